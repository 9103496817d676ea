//! Outbound dispense events.
//!
//! The [`Dispenser`](super::service::Dispenser) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log, forward to the kiosk UI, etc.

use crate::error::Error;
use crate::fsm::Phase;

/// Structured events emitted by the dispense core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispenseEvent {
    /// A validated request started.
    Started { slot: u16, quantity: u16, floor: i32 },

    /// The machine moved between phases.
    PhaseChanged { from: Phase, to: Phase },

    /// A single command timed out and is being retried.
    Retry { phase: Phase, attempt: u8 },

    /// The VMC acked a command; the sequence number was persisted.
    SequenceCommitted(u8),

    /// The VMC reported the outcome of one unit.
    ItemReported { index: u16, dispensed: bool },

    /// The request finished.
    Finished { dispensed: u16, requested: u16, error: Option<Error> },

    /// Emergency shutdown was triggered.
    ShutdownTriggered { last_phase: Phase },
}
