//! Table-driven dispense state machine.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  PhaseTable                                                    │
//! │  ┌───────────────────────────┬─────────────────┬─────────────┐ │
//! │  │ Phase                     │ on_input        │ on_timeout  │ │
//! │  ├───────────────────────────┼─────────────────┼─────────────┤ │
//! │  │ Ready                     │ fn(ctx,in,acts) │ fn(ctx,acts)│ │
//! │  │ LockingRack               │ fn(ctx,in,acts) │ fn(ctx,acts)│ │
//! │  │ ...                       │                 │             │ │
//! │  │ Finalizing                │ fn(ctx,in,acts) │ fn(ctx,acts)│ │
//! │  └───────────────────────────┴─────────────────┴─────────────┘ │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The machine is pure: `handle(Input) -> Actions`.  It never touches a
//! link or a clock.  The orchestrator in [`app::service`](crate::app::service)
//! performs the returned [`Action`]s in order and feeds every decoded
//! response and every expired timer back in as an [`Input`].
//!
//! Per phase, the current handler either ignores the input, stays, advances
//! to a new phase, completes the request or aborts it.  The engine owns the
//! cross-cutting rules: transition legality, timer re-arming, retry
//! accounting and keep-alive acks for unsolicited Polls.

pub mod context;
pub mod states;

use embassy_time::Duration;

use log::{debug, info, warn};

use crate::app::events::DispenseEvent;
use crate::config::TimingConfig;
use crate::error::Error;
use crate::protocol::motion::{MotionCommand, MotionResponse};
use crate::protocol::vmc::{CommandFrame, VmcResponse};
use context::{DispenseContext, DispenseReport};

// ---------------------------------------------------------------------------
// Phase identity
// ---------------------------------------------------------------------------

/// Every phase of one dispense operation.  Exactly one is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Phase {
    Ready = 0,
    LockingRack = 1,
    OpeningDoor = 2,
    LiftingUp = 3,
    WaitingForPoll = 4,
    WaitingForCmdAck = 5,
    WaitingForDispenseStatus = 6,
    LiftingDownToRest = 7,
    LiftingDown = 8,
    ClosingDoor = 9,
    Finalizing = 10,
}

impl Phase {
    /// Total number of phases, sizes the table array.
    pub const COUNT: usize = 11;

    /// Convert an index back to `Phase`.  Panics on out-of-range in debug
    /// builds; returns `Ready` in release.
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Ready,
            1 => Self::LockingRack,
            2 => Self::OpeningDoor,
            3 => Self::LiftingUp,
            4 => Self::WaitingForPoll,
            5 => Self::WaitingForCmdAck,
            6 => Self::WaitingForDispenseStatus,
            7 => Self::LiftingDownToRest,
            8 => Self::LiftingDown,
            9 => Self::ClosingDoor,
            10 => Self::Finalizing,
            _ => {
                debug_assert!(false, "invalid phase index: {idx}");
                Self::Ready
            }
        }
    }

    /// The single table of legal transitions.  Staying in a phase (a retry)
    /// is not a transition.
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Ready, LockingRack)
                | (LockingRack, OpeningDoor)
                | (OpeningDoor, LiftingUp)
                | (LiftingUp, WaitingForPoll)
                | (WaitingForPoll, WaitingForCmdAck)
                | (WaitingForCmdAck, WaitingForDispenseStatus)
                | (WaitingForCmdAck, WaitingForPoll)
                | (WaitingForDispenseStatus, WaitingForPoll)
                | (WaitingForDispenseStatus, LiftingDownToRest)
                | (LiftingDownToRest, LiftingDown)
                | (LiftingDown, ClosingDoor)
                | (ClosingDoor, Finalizing)
                | (Finalizing, Ready)
        )
    }

    /// Whether the lift may be away from rest in this phase.  Emergency
    /// shutdown is skipped when it is not.
    pub fn lift_raised(self) -> bool {
        !matches!(self, Self::Ready | Self::LockingRack | Self::OpeningDoor)
    }

    /// Timeout armed while this phase waits for its confirmation.
    pub fn timeout_class(self) -> Option<TimeoutClass> {
        use Phase::*;
        match self {
            Ready => None,
            LockingRack | WaitingForPoll | WaitingForCmdAck | LiftingDown | Finalizing => {
                Some(TimeoutClass::Communication)
            }
            OpeningDoor | ClosingDoor => Some(TimeoutClass::Door),
            LiftingUp | LiftingDownToRest => Some(TimeoutClass::Lift),
            WaitingForDispenseStatus => Some(TimeoutClass::DispenseStatus),
        }
    }
}

/// Per-command timeout classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    Communication,
    Door,
    Lift,
    DispenseStatus,
}

impl TimeoutClass {
    pub fn duration(self, timing: &TimingConfig) -> Duration {
        match self {
            Self::Communication => timing.communication(),
            Self::Door => timing.door(),
            Self::Lift => timing.lift(),
            Self::DispenseStatus => timing.dispense_status(),
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs and actions
// ---------------------------------------------------------------------------

/// Everything that can move the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// Begin the request.  Only meaningful in `Ready`.
    Start,
    Vmc(VmcResponse),
    Motion(MotionResponse),
    /// The armed per-command timer expired.
    CommandTimeout,
}

impl Input {
    /// Whether this input answers a command the host sent.  Only those reset
    /// the retry counter; a Poll is the VMC asking to be served.
    pub fn confirms_command(&self) -> bool {
        matches!(
            self,
            Self::Motion(_) | Self::Vmc(VmcResponse::Ack | VmcResponse::DispenseStatus { .. })
        )
    }
}

/// Side effects requested by the machine, performed in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SendMotion(MotionCommand),
    SendVmc(CommandFrame),
    /// Bare Ack on Channel A.
    SendVmcAck,
    PersistSequence(u8),
    /// Replace the per-command timer.
    ArmTimeout(TimeoutClass),
    /// Pause for the settle delay.
    Settle,
    Emit(DispenseEvent),
    /// The request is over.  Always the last action.
    Finish(DispenseReport),
}

pub type Actions = heapless::Vec<Action, 8>;

pub(crate) fn push(actions: &mut Actions, action: Action) {
    if actions.push(action).is_err() {
        debug_assert!(false, "action list overflow");
    }
}

/// A handler's verdict on one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Not the response this phase waits for.
    Ignored,
    /// Handled without a transition; re-arm this phase's timer.
    Stay,
    Advance(Phase),
    /// Every step finished; return to `Ready`.
    Complete,
    Abort(Error),
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

pub type InputFn = fn(&mut DispenseContext, &Input, &mut Actions) -> Step;

/// Called after retry accounting when the phase's timer expires.
pub type TimeoutFn = fn(&mut DispenseContext, &mut Actions) -> Step;

/// Static descriptor for a single phase.
pub struct PhaseDescriptor {
    pub id: Phase,
    pub name: &'static str,
    pub on_input: InputFn,
    pub on_timeout: TimeoutFn,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct DispenseMachine {
    table: [PhaseDescriptor; Phase::COUNT],
    current: Phase,
    ctx: DispenseContext,
    finished: bool,
}

impl DispenseMachine {
    pub fn new(ctx: DispenseContext) -> Self {
        Self {
            table: states::build_phase_table(),
            current: Phase::Ready,
            ctx,
            finished: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.current
    }

    pub fn context(&self) -> &DispenseContext {
        &self.ctx
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one input, collect the resulting actions.
    pub fn handle(&mut self, input: Input) -> Actions {
        let mut actions = Actions::new();
        if self.finished {
            return actions;
        }

        let step = if input == Input::CommandTimeout {
            self.on_timeout(&mut actions)
        } else {
            let on_input = self.descriptor().on_input;
            on_input(&mut self.ctx, &input, &mut actions)
        };
        let confirmed = input.confirms_command();

        match step {
            Step::Ignored => self.ignore(&input, &mut actions),
            Step::Stay => {
                if let Some(class) = self.current.timeout_class() {
                    push(&mut actions, Action::ArmTimeout(class));
                }
            }
            Step::Advance(next) => {
                if confirmed {
                    self.ctx.counters.retry_count = 0;
                }
                self.transition(next, &mut actions);
            }
            Step::Complete => {
                self.ctx.counters.retry_count = 0;
                push(&mut actions, Action::Settle);
                self.transition(Phase::Ready, &mut actions);
                self.finish(None, &mut actions);
            }
            Step::Abort(e) => self.finish(Some(e), &mut actions),
        }
        actions
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn descriptor(&self) -> &PhaseDescriptor {
        &self.table[self.current as usize]
    }

    fn on_timeout(&mut self, actions: &mut Actions) -> Step {
        if self.current == Phase::Ready {
            return Step::Ignored;
        }
        let name = self.descriptor().name;
        let attempt = self.ctx.counters.retry_count.saturating_add(1);
        self.ctx.counters.retry_count = attempt;
        if attempt > self.ctx.max_retries {
            warn!("{} timed out {} times, giving up", name, attempt);
            return Step::Abort(Error::MaxRetriesExceeded);
        }

        warn!(
            "{}: {}, retry {}/{}",
            name,
            Error::CommunicationTimeout,
            attempt,
            self.ctx.max_retries
        );
        push(
            actions,
            Action::Emit(DispenseEvent::Retry {
                phase: self.current,
                attempt,
            }),
        );
        let on_timeout = self.descriptor().on_timeout;
        on_timeout(&mut self.ctx, actions)
    }

    fn ignore(&self, input: &Input, actions: &mut Actions) {
        match input {
            // The VMC keeps polling; anything but our pending command gets a keep-alive.
            Input::Vmc(VmcResponse::Poll) => push(actions, Action::SendVmcAck),
            // A late or repeated status report still needs acking or the VMC repeats it.
            Input::Vmc(VmcResponse::DispenseStatus { .. }) => {
                debug!("{}: acking stray dispense status", self.descriptor().name);
                push(actions, Action::SendVmcAck);
            }
            Input::CommandTimeout => {}
            other => debug!("{}: ignoring {:?}", self.descriptor().name, other),
        }
    }

    fn transition(&mut self, next: Phase, actions: &mut Actions) {
        debug_assert!(
            self.current.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.current,
            next
        );

        info!(
            "Dispense phase: {} -> {}",
            self.descriptor().name,
            self.table[next as usize].name
        );
        push(
            actions,
            Action::Emit(DispenseEvent::PhaseChanged {
                from: self.current,
                to: next,
            }),
        );
        self.current = next;

        if let Some(class) = next.timeout_class() {
            push(actions, Action::ArmTimeout(class));
        }
    }

    fn finish(&mut self, error: Option<Error>, actions: &mut Actions) {
        let report = self.ctx.report(error);
        push(
            actions,
            Action::Emit(DispenseEvent::Finished {
                dispensed: report.dispensed,
                requested: report.requested,
                error: report.error,
            }),
        );
        push(actions, Action::Finish(report));
        self.finished = true;
    }
}
