//! Unified error types for the dispense controller.
//!
//! A single `Error` enum that every subsystem converts into, so the
//! orchestrator and the emergency supervisor handle failures uniformly.
//! All variants are `Copy` so they can ride inside FSM actions and reports
//! without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible dispense operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A serial device node is missing, lacks permissions, or could not be
    /// configured.  Fails `connect`.
    PortUnavailable,
    /// An operation needed the serial links but the transport is not connected.
    NotConnected,
    /// No response arrived within a phase's timeout class.
    CommunicationTimeout,
    /// A single command timed out more than the configured retry limit.
    MaxRetriesExceeded,
    /// The whole operation hit its overall ceiling.
    OverallDeadlineExceeded,
    /// Some but not all requested items were confirmed.
    PartialDispense { dispensed: u16, requested: u16 },
    /// The request was rejected before any hardware I/O.
    InvalidRequest(&'static str),
    /// A command frame could not be encoded.
    Codec(CodecError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortUnavailable => write!(f, "serial port unavailable"),
            Self::NotConnected => write!(f, "serial ports not connected"),
            Self::CommunicationTimeout => write!(f, "communication timeout"),
            Self::MaxRetriesExceeded => write!(f, "maximum retries exceeded"),
            Self::OverallDeadlineExceeded => write!(f, "overall deadline exceeded"),
            Self::PartialDispense {
                dispensed,
                requested,
            } => write!(f, "partial dispense: {dispensed}/{requested} items"),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            Self::Codec(e) => write!(f, "codec: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Sequence number outside `1..=255`.
    InvalidSequence,
    /// Slot number does not fit in 16 bits.
    SlotOutOfRange,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSequence => write!(f, "sequence number must be 1-255"),
            Self::SlotOutOfRange => write!(f, "slot does not fit in 16 bits"),
        }
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
