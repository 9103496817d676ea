//! Phase handler implementations.
//!
//! Each phase has an input handler and a timeout handler.  Input handlers
//! match the one confirmation their phase waits for and emit the next
//! command; timeout handlers implement the per-link retry policy:
//!
//! - Channel-B phases resend their command verbatim.
//! - `WaitingForPoll` keeps waiting.
//! - `WaitingForCmdAck` rewinds to `WaitingForPoll` with the same frame.
//! - `WaitingForDispenseStatus` rewinds with a frame re-encoded under the
//!   sequence number the VMC already acknowledged.
//!
//! Retry accounting and the give-up decision live in the engine.

use log::{info, warn};

use super::context::DispenseContext;
use super::{push, Action, Actions, Input, Phase, PhaseDescriptor, Step};
use crate::app::events::DispenseEvent;
use crate::protocol::motion::{MotionCommand, MotionResponse};
use crate::protocol::vmc::VmcResponse;

/// Build the phase table.  Order must match [`Phase`] discriminants.
pub fn build_phase_table() -> [PhaseDescriptor; Phase::COUNT] {
    [
        PhaseDescriptor {
            id: Phase::Ready,
            name: "Ready",
            on_input: ready_input,
            on_timeout: idle_timeout,
        },
        PhaseDescriptor {
            id: Phase::LockingRack,
            name: "LockingRack",
            on_input: locking_rack_input,
            on_timeout: resend_motion,
        },
        PhaseDescriptor {
            id: Phase::OpeningDoor,
            name: "OpeningDoor",
            on_input: opening_door_input,
            on_timeout: resend_motion,
        },
        PhaseDescriptor {
            id: Phase::LiftingUp,
            name: "LiftingUp",
            on_input: lifting_up_input,
            on_timeout: resend_motion,
        },
        PhaseDescriptor {
            id: Phase::WaitingForPoll,
            name: "WaitingForPoll",
            on_input: waiting_for_poll_input,
            on_timeout: keep_waiting,
        },
        PhaseDescriptor {
            id: Phase::WaitingForCmdAck,
            name: "WaitingForCmdAck",
            on_input: waiting_for_cmd_ack_input,
            on_timeout: cmd_ack_timeout,
        },
        PhaseDescriptor {
            id: Phase::WaitingForDispenseStatus,
            name: "WaitingForDispenseStatus",
            on_input: waiting_for_status_input,
            on_timeout: status_timeout,
        },
        PhaseDescriptor {
            id: Phase::LiftingDownToRest,
            name: "LiftingDownToRest",
            on_input: lifting_down_to_rest_input,
            on_timeout: resend_motion,
        },
        PhaseDescriptor {
            id: Phase::LiftingDown,
            name: "LiftingDown",
            on_input: lifting_down_input,
            on_timeout: resend_motion,
        },
        PhaseDescriptor {
            id: Phase::ClosingDoor,
            name: "ClosingDoor",
            on_input: closing_door_input,
            on_timeout: resend_motion,
        },
        PhaseDescriptor {
            id: Phase::Finalizing,
            name: "Finalizing",
            on_input: finalizing_input,
            on_timeout: resend_motion,
        },
    ]
}

fn send_motion(ctx: &mut DispenseContext, cmd: MotionCommand, actions: &mut Actions) {
    ctx.last_motion = Some(cmd);
    push(actions, Action::SendMotion(cmd));
}

/// Common shape of the Channel-B phases: on `expected`, send `next_cmd` and
/// advance to `next`.
fn on_motion(
    ctx: &mut DispenseContext,
    input: &Input,
    actions: &mut Actions,
    expected: MotionResponse,
    next_cmd: MotionCommand,
    next: Phase,
) -> Step {
    match input {
        Input::Motion(r) if *r == expected => {
            send_motion(ctx, next_cmd, actions);
            Step::Advance(next)
        }
        _ => Step::Ignored,
    }
}

// ---------------------------------------------------------------------------
// READY
// ---------------------------------------------------------------------------

fn ready_input(ctx: &mut DispenseContext, input: &Input, actions: &mut Actions) -> Step {
    if *input != Input::Start {
        return Step::Ignored;
    }
    let req = ctx.request;
    info!(
        "Dispensing {} from slot {} (floor {})",
        req.quantity,
        req.slot,
        req.floor()
    );
    push(
        actions,
        Action::Emit(DispenseEvent::Started {
            slot: req.slot,
            quantity: req.quantity,
            floor: req.floor(),
        }),
    );
    send_motion(ctx, MotionCommand::lock_rack(), actions);
    Step::Advance(Phase::LockingRack)
}

fn idle_timeout(_ctx: &mut DispenseContext, _actions: &mut Actions) -> Step {
    Step::Ignored
}

// ---------------------------------------------------------------------------
// Raise: lock → open → lift
// ---------------------------------------------------------------------------

fn locking_rack_input(ctx: &mut DispenseContext, input: &Input, actions: &mut Actions) -> Step {
    on_motion(
        ctx,
        input,
        actions,
        MotionResponse::RackLocked,
        MotionCommand::open_door(),
        Phase::OpeningDoor,
    )
}

fn opening_door_input(ctx: &mut DispenseContext, input: &Input, actions: &mut Actions) -> Step {
    let floor = ctx.request.floor();
    on_motion(
        ctx,
        input,
        actions,
        MotionResponse::DoorOpened,
        MotionCommand::lift_to(floor),
        Phase::LiftingUp,
    )
}

fn lifting_up_input(ctx: &mut DispenseContext, input: &Input, _actions: &mut Actions) -> Step {
    if *input != Input::Motion(MotionResponse::LiftArrived) {
        return Step::Ignored;
    }
    match ctx.prepare_next_item() {
        Ok(()) => Step::Advance(Phase::WaitingForPoll),
        Err(e) => Step::Abort(e),
    }
}

// ---------------------------------------------------------------------------
// Release: poll → ack → status, once per unit
// ---------------------------------------------------------------------------

fn waiting_for_poll_input(ctx: &mut DispenseContext, input: &Input, actions: &mut Actions) -> Step {
    if *input != Input::Vmc(VmcResponse::Poll) {
        return Step::Ignored;
    }
    let Some(frame) = ctx.pending.take() else {
        return Step::Ignored;
    };
    ctx.in_flight = Some(frame);
    push(actions, Action::SendVmc(frame));
    Step::Advance(Phase::WaitingForCmdAck)
}

fn keep_waiting(_ctx: &mut DispenseContext, _actions: &mut Actions) -> Step {
    Step::Stay
}

fn waiting_for_cmd_ack_input(
    ctx: &mut DispenseContext,
    input: &Input,
    actions: &mut Actions,
) -> Step {
    if *input != Input::Vmc(VmcResponse::Ack) {
        return Step::Ignored;
    }
    let Some(frame) = ctx.in_flight.take() else {
        return Step::Ignored;
    };
    let seq = frame.sequence();
    ctx.sequence = seq;
    push(actions, Action::PersistSequence(seq));
    push(actions, Action::Emit(DispenseEvent::SequenceCommitted(seq)));
    Step::Advance(Phase::WaitingForDispenseStatus)
}

fn cmd_ack_timeout(ctx: &mut DispenseContext, _actions: &mut Actions) -> Step {
    if let Some(frame) = ctx.in_flight.take() {
        ctx.pending = Some(frame);
    }
    Step::Advance(Phase::WaitingForPoll)
}

fn waiting_for_status_input(
    ctx: &mut DispenseContext,
    input: &Input,
    actions: &mut Actions,
) -> Step {
    let Input::Vmc(resp @ VmcResponse::DispenseStatus { status, .. }) = *input else {
        return Step::Ignored;
    };
    push(actions, Action::SendVmcAck);

    let index = ctx.counters.item_index;
    let dispensed = resp.is_dispensed();
    if dispensed {
        ctx.counters.items_dispensed += 1;
    } else {
        warn!("Unit {} not released (status {:02x})", index + 1, status);
    }
    push(
        actions,
        Action::Emit(DispenseEvent::ItemReported { index, dispensed }),
    );
    ctx.counters.item_index += 1;

    if ctx.items_remaining() {
        push(actions, Action::Settle);
        return match ctx.prepare_next_item() {
            Ok(()) => Step::Advance(Phase::WaitingForPoll),
            Err(e) => Step::Abort(e),
        };
    }
    send_motion(ctx, MotionCommand::lift_to_rest(), actions);
    Step::Advance(Phase::LiftingDownToRest)
}

fn status_timeout(ctx: &mut DispenseContext, _actions: &mut Actions) -> Step {
    match ctx.prepare_resend() {
        Ok(()) => Step::Advance(Phase::WaitingForPoll),
        Err(e) => Step::Abort(e),
    }
}

// ---------------------------------------------------------------------------
// Lower: rest → fine-down → close → unlock
// ---------------------------------------------------------------------------

fn lifting_down_to_rest_input(
    ctx: &mut DispenseContext,
    input: &Input,
    actions: &mut Actions,
) -> Step {
    on_motion(
        ctx,
        input,
        actions,
        MotionResponse::LiftArrived,
        MotionCommand::lift_fine_down(),
        Phase::LiftingDown,
    )
}

fn lifting_down_input(ctx: &mut DispenseContext, input: &Input, actions: &mut Actions) -> Step {
    on_motion(
        ctx,
        input,
        actions,
        MotionResponse::LiftArrived,
        MotionCommand::close_door(),
        Phase::ClosingDoor,
    )
}

fn closing_door_input(ctx: &mut DispenseContext, input: &Input, actions: &mut Actions) -> Step {
    on_motion(
        ctx,
        input,
        actions,
        MotionResponse::DoorClosed,
        MotionCommand::unlock_rack(),
        Phase::Finalizing,
    )
}

fn finalizing_input(_ctx: &mut DispenseContext, input: &Input, _actions: &mut Actions) -> Step {
    match input {
        Input::Motion(MotionResponse::RackUnlocked) => Step::Complete,
        _ => Step::Ignored,
    }
}

/// Channel-B timeout: resend the phase's command unchanged.
fn resend_motion(ctx: &mut DispenseContext, actions: &mut Actions) -> Step {
    if let Some(cmd) = ctx.last_motion {
        push(actions, Action::SendMotion(cmd));
    }
    Step::Stay
}
