//! Per-call state threaded through every phase handler.
//!
//! `DispenseContext` is the blackboard the handlers read from and write to:
//! the validated request, attempt counters, the Channel-A command currently
//! pending or in flight, and the last sequence number the VMC acknowledged.
//! It lives exactly as long as one `dispense` call.

use crate::config::KioskConfig;
use crate::error::{Error, Result};
use crate::protocol::motion::MotionCommand;
use crate::protocol::vmc::{next_sequence, CommandFrame};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A validated dispense request: `quantity` single-item releases from `slot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispenseRequest {
    pub quantity: u16,
    pub slot: u16,
}

impl DispenseRequest {
    /// Validate against the cabinet's slot capacity.  Rejected requests never
    /// reach the hardware.
    pub fn new(quantity: u32, slot: u32, capacity: u16) -> Result<Self> {
        if quantity == 0 {
            return Err(Error::InvalidRequest("quantity must be at least 1"));
        }
        let quantity =
            u16::try_from(quantity).map_err(|_| Error::InvalidRequest("quantity too large"))?;
        if slot == 0 || slot > u32::from(capacity) {
            return Err(Error::InvalidRequest("slot outside cabinet"));
        }
        // `capacity` is a u16, so this cannot fail past the range check.
        let slot = u16::try_from(slot).map_err(|_| Error::InvalidRequest("slot outside cabinet"))?;
        Ok(Self { quantity, slot })
    }

    /// Lift height of the shelf holding this request's slot.
    pub fn floor(&self) -> i32 {
        floor_for_slot(self.slot)
    }
}

/// Shelf height for a slot.  Ten slots per shelf, top shelf first.
pub fn floor_for_slot(slot: u16) -> i32 {
    match slot {
        0..=10 => 1400,
        11..=20 => 1210,
        21..=30 => 1010,
        31..=40 => 790,
        41..=50 => 580,
        51..=60 => 360,
        _ => 20,
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Attempt bookkeeping, reset at the start of every call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptCounters {
    /// Consecutive timeouts on the current command.
    pub retry_count: u8,
    /// Units the VMC confirmed as released.
    pub items_dispensed: u16,
    /// Index of the unit currently being released (0-based).
    pub item_index: u16,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Final result of one dispense call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispenseReport {
    pub requested: u16,
    pub dispensed: u16,
    pub error: Option<Error>,
}

impl DispenseReport {
    pub fn rejected(requested: u16, error: Error) -> Self {
        Self {
            requested,
            dispensed: 0,
            error: Some(error),
        }
    }

    /// True iff every requested unit was confirmed.
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.dispensed == self.requested
    }
}

// ---------------------------------------------------------------------------
// DispenseContext
// ---------------------------------------------------------------------------

pub struct DispenseContext {
    pub request: DispenseRequest,
    pub counters: AttemptCounters,
    pub max_retries: u8,
    drop_sensor: bool,
    elevator: bool,

    /// Last sequence number the VMC acknowledged (persisted).
    pub sequence: u8,
    /// Command waiting for the next Poll.
    pub pending: Option<CommandFrame>,
    /// Command sent, waiting for its Ack.
    pub in_flight: Option<CommandFrame>,
    /// Last Channel-B command, resent verbatim on timeout.
    pub last_motion: Option<MotionCommand>,
}

impl DispenseContext {
    pub fn new(request: DispenseRequest, last_sequence: u8, config: &KioskConfig) -> Self {
        Self {
            request,
            counters: AttemptCounters::default(),
            max_retries: config.timing.max_retries,
            drop_sensor: config.drop_sensor,
            elevator: config.elevator,
            sequence: if last_sequence == 0 { 1 } else { last_sequence },
            pending: None,
            in_flight: None,
            last_motion: None,
        }
    }

    /// Encode the command for the current unit with the next sequence number
    /// and hold it until the VMC polls.
    pub fn prepare_next_item(&mut self) -> Result<()> {
        self.prepare_with_sequence(next_sequence(self.sequence))
    }

    /// Re-encode the current unit reusing the already acknowledged sequence
    /// number.
    pub fn prepare_resend(&mut self) -> Result<()> {
        self.prepare_with_sequence(self.sequence)
    }

    fn prepare_with_sequence(&mut self, sequence: u8) -> Result<()> {
        let frame = CommandFrame::encode(
            u32::from(self.request.slot),
            sequence,
            self.drop_sensor,
            self.elevator,
        )?;
        self.pending = Some(frame);
        self.in_flight = None;
        Ok(())
    }

    pub fn items_remaining(&self) -> bool {
        self.counters.item_index < self.request.quantity
    }

    pub fn report(&self, error: Option<Error>) -> DispenseReport {
        let error = error.or_else(|| {
            (self.counters.items_dispensed < self.request.quantity).then_some(
                Error::PartialDispense {
                    dispensed: self.counters.items_dispensed,
                    requested: self.request.quantity,
                },
            )
        });
        DispenseReport {
            requested: self.request.quantity,
            dispensed: self.counters.items_dispensed,
            error,
        }
    }
}
