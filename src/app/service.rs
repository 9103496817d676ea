//! Dispense service: the hexagonal core.
//!
//! [`Dispenser`] owns the configuration and the event sink and shares the
//! transport with the emergency supervisor.  It turns one
//! `dispense(quantity, slot)` call into a run of the
//! [`DispenseMachine`](crate::fsm::DispenseMachine).
//!
//! ```text
//!  VMC reader ────┐                       ┌──▶ Transport (Channel A / B)
//!                 ├─▶ input queue ─▶ loop ┤
//!  motion reader ─┘        ▲              └──▶ EventSink
//!                          │
//!                    per-command timer, overall deadline
//! ```
//!
//! Both reader threads only decode and enqueue.  A single async loop owns
//! the machine, the timer and every write, so no lock guards dispense
//! state.  The whole loop runs under the overall deadline; when it
//! expires, or when retries run out with the lift raised, the emergency
//! shutdown runs on its own thread and is awaited before returning.

use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{with_deadline, Instant, Timer};
use futures_lite::future::block_on;
use futures_lite::FutureExt;
use log::{debug, error, info, warn};

use crate::config::KioskConfig;
use crate::error::Error;
use crate::fsm::context::{DispenseContext, DispenseRequest};
use crate::fsm::{Action, DispenseMachine, Input};
use crate::protocol::motion::{MotionDecoder, MotionResponse};
use crate::protocol::vmc::{self, VmcDecoder, VmcResponse};
use crate::safety::{EmergencyShutdown, ShutdownGuard, ShutdownTimeouts};

use super::events::DispenseEvent;
use super::ports::{EventSink, FrameCallback, Link, Transport};

pub use crate::fsm::context::DispenseReport;

/// Decoded inputs waiting for the orchestration loop.
const INPUT_QUEUE: usize = 32;

type InputQueue = Channel<CriticalSectionRawMutex, Input, INPUT_QUEUE>;

// ───────────────────────────────────────────────────────────────
// Reader callbacks
// ───────────────────────────────────────────────────────────────

/// Wrap a Channel-A handler into a reader callback that reassembles frames.
pub fn vmc_reader<F>(mut deliver: F) -> FrameCallback
where
    F: FnMut(VmcResponse, &[u8]) + Send + 'static,
{
    let mut decoder = VmcDecoder::new();
    Box::new(move |chunk: &[u8]| {
        decoder.feed(chunk);
        while let Some(frame) = decoder.next_frame() {
            deliver(VmcResponse::classify(&frame), &frame);
        }
    })
}

/// Wrap a Channel-B handler into a reader callback that reassembles replies.
pub fn motion_reader<F>(mut deliver: F) -> FrameCallback
where
    F: FnMut(MotionResponse, &[u8]) + Send + 'static,
{
    let mut decoder = MotionDecoder::new();
    Box::new(move |chunk: &[u8]| {
        decoder.feed(chunk);
        while let Some(reply) = decoder.next_reply() {
            deliver(MotionResponse::classify(&reply), &reply);
        }
    })
}

fn enqueue(queue: &InputQueue, input: Input) {
    if queue.try_send(input).is_err() {
        warn!("Input queue full, dropping {:?}", input);
    }
}

// ───────────────────────────────────────────────────────────────
// Dispenser
// ───────────────────────────────────────────────────────────────

pub struct Dispenser<T: Transport + 'static, S: EventSink> {
    transport: Arc<T>,
    config: KioskConfig,
    sink: S,
}

impl<T: Transport + 'static, S: EventSink> Dispenser<T, S> {
    pub fn new(transport: Arc<T>, config: KioskConfig, sink: S) -> Self {
        Self {
            transport,
            config,
            sink,
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn config(&self) -> &KioskConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Open both links at the configured speeds.
    pub fn connect(&self) -> bool {
        self.transport
            .connect(self.config.vmc_baud, self.config.motion_baud)
    }

    /// Release `quantity` units from `slot`.  True iff every unit was
    /// confirmed by the VMC.
    pub fn dispense(&mut self, quantity: u32, slot: u32) -> bool {
        self.dispense_report(quantity, slot).is_complete()
    }

    /// Blocking variant of [`dispense_async`](Self::dispense_async).
    pub fn dispense_report(&mut self, quantity: u32, slot: u32) -> DispenseReport {
        block_on(self.dispense_async(quantity, slot))
    }

    /// Run one dispense request to completion.
    ///
    /// If this future is dropped mid-cycle, a [`ShutdownGuard`] triggers a
    /// detached emergency shutdown.
    pub async fn dispense_async(&mut self, quantity: u32, slot: u32) -> DispenseReport {
        let requested = u16::try_from(quantity).unwrap_or(u16::MAX);
        let request = match DispenseRequest::new(quantity, slot, self.config.slot_capacity) {
            Ok(r) => r,
            Err(e) => {
                warn!("Dispense rejected: {e}");
                return DispenseReport::rejected(requested, e);
            }
        };
        if !self.transport.is_connected() {
            warn!("Dispense rejected: {}", Error::NotConnected);
            return DispenseReport::rejected(requested, Error::NotConnected);
        }

        let ctx = DispenseContext::new(request, self.transport.sequence(), &self.config);
        let mut machine = DispenseMachine::new(ctx);

        let queue: Arc<InputQueue> = Arc::new(Channel::new());
        if !self.start_readers(&queue) {
            self.stop_readers();
            error!("Dispense aborted: could not start readers");
            return DispenseReport::rejected(requested, Error::PortUnavailable);
        }

        let timeouts = ShutdownTimeouts::from(&self.config.timing);
        let mut guard = ShutdownGuard::arm(Arc::clone(&self.transport), timeouts);
        let deadline = Instant::now() + self.config.timing.overall();

        let outcome = with_deadline(deadline, self.drive(&mut machine, &mut guard, &queue)).await;
        self.stop_readers();

        let last_phase = machine.phase();
        let report = match outcome {
            Ok(report) => report,
            Err(_) => {
                error!("Dispense exceeded overall deadline in {:?}", last_phase);
                let report = machine
                    .context()
                    .report(Some(Error::OverallDeadlineExceeded));
                self.sink.emit(&DispenseEvent::Finished {
                    dispensed: report.dispensed,
                    requested: report.requested,
                    error: report.error,
                });
                report
            }
        };

        let needs_shutdown = match report.error {
            Some(Error::OverallDeadlineExceeded) => true,
            Some(Error::MaxRetriesExceeded) => last_phase.lift_raised(),
            _ => false,
        };
        guard.disarm();

        if needs_shutdown {
            self.sink
                .emit(&DispenseEvent::ShutdownTriggered { last_phase });
            let shutdown =
                EmergencyShutdown::trigger(Arc::clone(&self.transport), last_phase, timeouts)
                    .wait()
                    .await;
            info!("Shutdown after failed dispense: {:?}", shutdown);
        }

        if report.is_complete() {
            info!("Dispensed {}/{}", report.dispensed, report.requested);
        } else {
            warn!(
                "Dispense failed: {}/{} ({})",
                report.dispensed,
                report.requested,
                report.error.map_or_else(|| "short count".into(), |e| e.to_string())
            );
        }
        report
    }

    // ── Internal ──────────────────────────────────────────────

    fn start_readers(&self, queue: &Arc<InputQueue>) -> bool {
        let vmc_queue = Arc::clone(queue);
        let vmc_ok = self.transport.start_reading(
            Link::Vmc,
            vmc_reader(move |resp, _raw| enqueue(&vmc_queue, Input::Vmc(resp))),
        );

        let motion_queue = Arc::clone(queue);
        let motion_ok = self.transport.start_reading(
            Link::Motion,
            motion_reader(move |resp, raw| {
                if resp == MotionResponse::Unrecognized {
                    debug!("Unrecognized motion reply {:02x?}", raw);
                }
                enqueue(&motion_queue, Input::Motion(resp));
            }),
        );
        vmc_ok && motion_ok
    }

    fn stop_readers(&self) {
        for link in Link::ALL {
            self.transport.stop_reading(link);
        }
    }

    /// Feed the machine until it finishes.
    async fn drive(
        &mut self,
        machine: &mut DispenseMachine,
        guard: &mut ShutdownGuard<T>,
        queue: &InputQueue,
    ) -> DispenseReport {
        let mut timer: Option<Instant> = None;
        let mut input = Input::Start;
        loop {
            let actions = machine.handle(input);
            guard.track(machine.phase());
            for action in actions {
                if let Some(report) = self.perform(action, &mut timer).await {
                    return report;
                }
            }

            input = match timer {
                Some(at) => {
                    queue
                        .receive()
                        .or(async {
                            Timer::at(at).await;
                            Input::CommandTimeout
                        })
                        .await
                }
                None => queue.receive().await,
            };
            if input == Input::CommandTimeout {
                timer = None;
            }
        }
    }

    async fn perform(&mut self, action: Action, timer: &mut Option<Instant>) -> Option<DispenseReport> {
        match action {
            Action::SendMotion(cmd) => {
                let line = cmd.encode();
                debug!("motion <- {}", line);
                if !self.transport.write_ascii(Link::Motion, &line) {
                    warn!("Motion write failed: {}", line);
                }
            }
            Action::SendVmc(frame) => {
                debug!("vmc <- {:02x?}", frame.as_bytes());
                if !self.transport.write_raw(Link::Vmc, frame.as_bytes()) {
                    warn!("VMC command write failed (seq {})", frame.sequence());
                }
            }
            Action::SendVmcAck => {
                if !self.transport.write_raw(Link::Vmc, &vmc::ACK) {
                    warn!("VMC ack write failed");
                }
            }
            Action::PersistSequence(seq) => self.transport.save_sequence(seq),
            Action::ArmTimeout(class) => {
                *timer = Some(Instant::now() + class.duration(&self.config.timing));
            }
            Action::Settle => Timer::after(self.config.timing.settle()).await,
            Action::Emit(event) => self.sink.emit(&event),
            Action::Finish(report) => return Some(report),
        }
        None
    }
}
