//! Emergency shutdown supervisor.
//!
//! Restores the mechanism to a safe resting state when a dispense cannot
//! finish: lift to rest, door closed, rack unlocked.
//!
//! ## Lifecycle
//!
//! 1. The orchestrator (or a dropped [`ShutdownGuard`]) calls
//!    [`EmergencyShutdown::trigger`] with the last phase it reached.
//! 2. The sequence runs on its own thread with its own executor, so it is
//!    not cancelled with the caller's future.
//! 3. If that phase shows the lift was never raised, nothing is sent.
//! 4. Otherwise each step waits a bounded time for its confirmation, logs
//!    a miss and carries on.  Nothing is raised to the caller; the
//!    [`ShutdownReport`] records what was confirmed.

use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};
use futures_lite::future::block_on;
use log::{error, info, warn};

use crate::app::ports::{Link, Transport};
use crate::app::service::motion_reader;
use crate::config::TimingConfig;
use crate::fsm::Phase;
use crate::protocol::motion::{MotionCommand, MotionResponse};

const REPLY_QUEUE: usize = 8;

type ReplyQueue = Channel<CriticalSectionRawMutex, MotionResponse, REPLY_QUEUE>;
type Completion = Signal<CriticalSectionRawMutex, ShutdownReport>;

/// What the shutdown sequence managed to confirm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// The lift was never raised; no command was sent.
    pub skipped: bool,
    pub lift_rested: bool,
    pub door_closed: bool,
    /// The unlock command was written (its reply is not awaited).
    pub unlock_sent: bool,
}

/// Bounded waits used by the shutdown sequence.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownTimeouts {
    pub lift: Duration,
    pub door: Duration,
}

impl From<&TimingConfig> for ShutdownTimeouts {
    fn from(t: &TimingConfig) -> Self {
        Self {
            lift: Duration::from_millis(t.shutdown_lift_timeout_ms),
            door: Duration::from_millis(t.shutdown_door_timeout_ms),
        }
    }
}

pub struct EmergencyShutdown;

impl EmergencyShutdown {
    /// Start the shutdown sequence on a dedicated thread.
    pub fn trigger<T: Transport + 'static>(
        transport: Arc<T>,
        last_phase: Phase,
        timeouts: ShutdownTimeouts,
    ) -> ShutdownHandle {
        let done: Arc<Completion> = Arc::new(Signal::new());
        let signal = Arc::clone(&done);

        let spawned = std::thread::Builder::new()
            .name("emergency-shutdown".into())
            .spawn(move || {
                let report = block_on(run(transport.as_ref(), last_phase, timeouts));
                signal.signal(report);
            });

        if let Err(e) = spawned {
            error!("EMERGENCY SHUTDOWN: could not spawn supervisor thread: {e}");
            done.signal(ShutdownReport::default());
        }
        ShutdownHandle { done }
    }
}

/// Completion handle of a triggered shutdown.  Dropping it detaches the
/// sequence, which still runs to the end.
pub struct ShutdownHandle {
    done: Arc<Completion>,
}

impl ShutdownHandle {
    pub async fn wait(self) -> ShutdownReport {
        self.done.wait().await
    }

    pub fn wait_blocking(self) -> ShutdownReport {
        block_on(self.wait())
    }
}

/// The shutdown sequence itself.
pub async fn run<T: Transport + ?Sized>(
    transport: &T,
    last_phase: Phase,
    timeouts: ShutdownTimeouts,
) -> ShutdownReport {
    let mut report = ShutdownReport::default();
    if !last_phase.lift_raised() {
        info!("Emergency shutdown skipped, lift never left rest ({:?})", last_phase);
        report.skipped = true;
        return report;
    }
    warn!("EMERGENCY SHUTDOWN from {:?}", last_phase);

    let replies: Arc<ReplyQueue> = Arc::new(Channel::new());
    let sink = Arc::clone(&replies);
    let reading = transport.start_reading(
        Link::Motion,
        motion_reader(move |reply, _raw| {
            if sink.try_send(reply).is_err() {
                warn!("shutdown reply queue full, dropping {:?}", reply);
            }
        }),
    );
    if !reading {
        error!("EMERGENCY SHUTDOWN: motion reader unavailable, sending blind");
    }

    report.lift_rested = step(
        transport,
        &replies,
        MotionCommand::lift_to_rest(),
        MotionResponse::LiftArrived,
        timeouts.lift,
        "lift to rest",
    )
    .await;

    report.door_closed = step(
        transport,
        &replies,
        MotionCommand::close_door(),
        MotionResponse::DoorClosed,
        timeouts.door,
        "door close",
    )
    .await;

    report.unlock_sent = transport.write_ascii(Link::Motion, &MotionCommand::unlock_rack().encode());
    if !report.unlock_sent {
        error!("EMERGENCY SHUTDOWN: unlock write failed");
    }

    transport.stop_reading(Link::Motion);
    info!("Emergency shutdown finished: {:?}", report);
    report
}

async fn step<T: Transport + ?Sized>(
    transport: &T,
    replies: &ReplyQueue,
    cmd: MotionCommand,
    expected: MotionResponse,
    timeout: Duration,
    what: &str,
) -> bool {
    if !transport.write_ascii(Link::Motion, &cmd.encode()) {
        error!("EMERGENCY SHUTDOWN: {what} write failed");
        return false;
    }
    let confirmed = with_timeout(timeout, async {
        while replies.receive().await != expected {}
    })
    .await
    .is_ok();
    if confirmed {
        info!("Emergency shutdown: {what} confirmed");
    } else {
        warn!("Emergency shutdown: {what} not confirmed within {} ms", timeout.as_millis());
    }
    confirmed
}

// ---------------------------------------------------------------------------
// Drop guard
// ---------------------------------------------------------------------------

/// Armed for the duration of a dispense.  If the dispense future is dropped
/// mid-cycle, the guard stops the readers and triggers a detached shutdown
/// from the last phase it was told about.
pub struct ShutdownGuard<T: Transport + 'static> {
    transport: Arc<T>,
    timeouts: ShutdownTimeouts,
    last_phase: Phase,
    armed: bool,
}

impl<T: Transport + 'static> ShutdownGuard<T> {
    pub fn arm(transport: Arc<T>, timeouts: ShutdownTimeouts) -> Self {
        Self {
            transport,
            timeouts,
            last_phase: Phase::Ready,
            armed: true,
        }
    }

    pub fn track(&mut self, phase: Phase) {
        self.last_phase = phase;
    }

    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T: Transport + 'static> Drop for ShutdownGuard<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Dispense abandoned in {:?}", self.last_phase);
        for link in Link::ALL {
            self.transport.stop_reading(link);
        }
        if self.last_phase.lift_raised() {
            // Detached: the handle is dropped, the thread runs to completion.
            let _ = EmergencyShutdown::trigger(
                Arc::clone(&self.transport),
                self.last_phase,
                self.timeouts,
            );
        }
    }
}
