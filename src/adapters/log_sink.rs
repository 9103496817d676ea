//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured dispense events to the
//! `log` facade.  A kiosk UI bridge would implement the same trait.

use log::{info, warn};

use crate::app::events::DispenseEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`DispenseEvent`].
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &DispenseEvent) {
        match event {
            DispenseEvent::Started {
                slot,
                quantity,
                floor,
            } => {
                info!("START | slot={} qty={} floor={}", slot, quantity, floor);
            }
            DispenseEvent::PhaseChanged { from, to } => {
                info!("PHASE | {:?} -> {:?}", from, to);
            }
            DispenseEvent::Retry { phase, attempt } => {
                warn!("RETRY | {:?} attempt={}", phase, attempt);
            }
            DispenseEvent::SequenceCommitted(seq) => {
                info!("SEQ   | committed={}", seq);
            }
            DispenseEvent::ItemReported { index, dispensed } => {
                info!(
                    "ITEM  | #{} {}",
                    index + 1,
                    if *dispensed { "OK" } else { "FAILED" }
                );
            }
            DispenseEvent::Finished {
                dispensed,
                requested,
                error,
            } => match error {
                None => info!("DONE  | {}/{}", dispensed, requested),
                Some(e) => warn!("DONE  | {}/{} error={}", dispensed, requested, e),
            },
            DispenseEvent::ShutdownTriggered { last_phase } => {
                warn!("SHUTDOWN | from {:?}", last_phase);
            }
        }
    }
}
