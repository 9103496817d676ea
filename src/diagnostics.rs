//! Operator diagnostics.
//!
//! Single-module tests used from the service menu while commissioning a
//! cabinet: release one unit from a slot without moving the lift, send a
//! raw motion command and show whatever comes back, and reset the
//! communication sequence number after swapping a VMC board.
//!
//! None of these go through the dispense state machine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{with_timeout, Duration};
use futures_lite::future::block_on;
use log::{info, warn};

use crate::app::ports::{EventSink, Link, Transport};
use crate::app::service::{vmc_reader, Dispenser};
use crate::error::{Error, Result};
use crate::protocol::vmc::{self, next_sequence, CommandFrame, RawFrame, VmcResponse};

const TEST_QUEUE: usize = 8;

#[derive(Debug, Clone)]
enum VmcTestEvent {
    Ack,
    Status(RawFrame),
}

/// Outcome of a single-module VMC test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmcTestReport {
    /// Sequence number the test command carried.
    pub sequence: u8,
    pub ack_received: bool,
    /// The dispense status frame, if one arrived in time.
    pub status: Option<RawFrame>,
}

impl VmcTestReport {
    pub fn dispensed(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|f| VmcResponse::classify(f).is_dispensed())
    }
}

impl<T: Transport + 'static, S: EventSink> Dispenser<T, S> {
    /// Release one unit from `slot` through Channel A only.
    ///
    /// The command is sent in answer to the VMC's Poll.  Waits for its Ack
    /// (persisting the sequence number), then for a dispense status, which
    /// is acked.
    pub fn test_vmc(&mut self, slot: u32) -> Result<VmcTestReport> {
        let transport = Arc::clone(self.transport());
        if !transport.is_connected() {
            return Err(Error::NotConnected);
        }
        let cfg = self.config();
        let timing = cfg.timing;
        let sequence = next_sequence(transport.sequence());
        let frame = CommandFrame::encode(slot, sequence, cfg.drop_sensor, cfg.elevator)?;
        info!("VMC test: slot {} seq {}", slot, sequence);

        let events: Arc<Channel<CriticalSectionRawMutex, VmcTestEvent, TEST_QUEUE>> =
            Arc::new(Channel::new());
        let acked = Arc::new(AtomicBool::new(false));

        let reader_events = Arc::clone(&events);
        let reader_transport = Arc::clone(&transport);
        let reader_acked = Arc::clone(&acked);
        let started = transport.start_reading(
            Link::Vmc,
            vmc_reader(move |resp, raw| match resp {
                VmcResponse::Poll => {
                    // Serve the command until it is acked, keep-alive after.
                    let bytes = if reader_acked.load(Ordering::SeqCst) {
                        &vmc::ACK[..]
                    } else {
                        frame.as_bytes()
                    };
                    reader_transport.write_raw(Link::Vmc, bytes);
                }
                VmcResponse::Ack => {
                    if !reader_acked.swap(true, Ordering::SeqCst) {
                        reader_transport.save_sequence(sequence);
                        let _ = reader_events.try_send(VmcTestEvent::Ack);
                    }
                }
                VmcResponse::DispenseStatus { .. } => {
                    reader_transport.write_raw(Link::Vmc, &vmc::ACK);
                    let mut f = RawFrame::new();
                    let _ = f.extend_from_slice(raw);
                    let _ = reader_events.try_send(VmcTestEvent::Status(f));
                }
                VmcResponse::Other { .. } => {}
            }),
        );
        if !started {
            return Err(Error::PortUnavailable);
        }

        let ack_timeout = Duration::from_millis(timing.test_ack_timeout_ms);
        let status_timeout = timing.dispense_status();
        let (ack_received, status) = block_on(async {
            let ack = with_timeout(ack_timeout, async {
                while !matches!(events.receive().await, VmcTestEvent::Ack) {}
            })
            .await
            .is_ok();
            if !ack {
                return (false, None);
            }
            let status = with_timeout(status_timeout, async {
                loop {
                    if let VmcTestEvent::Status(f) = events.receive().await {
                        return f;
                    }
                }
            })
            .await
            .ok();
            (true, status)
        });
        transport.stop_reading(Link::Vmc);

        if !ack_received {
            warn!("VMC test: no ack within {} ms", ack_timeout.as_millis());
        } else if status.is_none() {
            warn!("VMC test: no dispense status within {} ms", status_timeout.as_millis());
        }
        Ok(VmcTestReport {
            sequence,
            ack_received,
            status,
        })
    }

    /// Write an arbitrary Channel-B command and return the first chunk read
    /// back, if any arrives in time.
    pub fn test_motion(&mut self, command: &str) -> Result<Option<Vec<u8>>> {
        let transport = Arc::clone(self.transport());
        if !transport.is_connected() {
            return Err(Error::NotConnected);
        }
        let replies: Arc<Channel<CriticalSectionRawMutex, Vec<u8>, TEST_QUEUE>> =
            Arc::new(Channel::new());
        let sink = Arc::clone(&replies);
        let started = transport.start_reading(
            Link::Motion,
            Box::new(move |chunk: &[u8]| {
                let _ = sink.try_send(chunk.to_vec());
            }),
        );
        if !started {
            return Err(Error::PortUnavailable);
        }

        info!("Motion test: {}", command);
        if !transport.write_ascii(Link::Motion, command) {
            transport.stop_reading(Link::Motion);
            return Err(Error::PortUnavailable);
        }
        let timeout = Duration::from_millis(self.config().timing.test_reply_timeout_ms);
        let reply = block_on(with_timeout(timeout, replies.receive())).ok();
        transport.stop_reading(Link::Motion);

        if reply.is_none() {
            warn!("Motion test: no reply within {} ms", timeout.as_millis());
        }
        Ok(reply)
    }

    /// Last sequence number acknowledged by the VMC.
    pub fn sequence(&self) -> u8 {
        self.transport().sequence()
    }

    /// Restart the sequence at 1.
    pub fn reset_sequence(&mut self) {
        info!("Sequence number reset to 1");
        self.transport().save_sequence(1);
    }
}
