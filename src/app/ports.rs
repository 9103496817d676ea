//! Port traits: the hexagonal boundary between the dispense core and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Dispenser (domain)
//! ```
//!
//! Driven adapters (serial links, line configuration, storage, event
//! sinks) implement these traits.  The [`Dispenser`](super::service::Dispenser)
//! consumes them via generics, so the orchestration core never touches a
//! device node directly and runs unchanged against a scripted mock.

use std::path::Path;

use crate::config::KioskConfig;
use crate::error::Error;

// ───────────────────────────────────────────────────────────────
// Transport port (driven adapter: domain ↔ both serial links)
// ───────────────────────────────────────────────────────────────

/// The two independent serial links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Link {
    /// Channel A: binary packets to the slot-release controller.
    Vmc,
    /// Channel B: ASCII commands to the lift/door controller.
    Motion,
}

impl Link {
    pub const ALL: [Link; 2] = [Link::Vmc, Link::Motion];

    pub fn name(self) -> &'static str {
        match self {
            Self::Vmc => "vmc",
            Self::Motion => "motion",
        }
    }
}

/// Receives each raw inbound chunk, in arrival order, on the reader's thread.
pub type FrameCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Owns both serial links for the life of the process.
///
/// Methods take `&self` so one transport can be shared (`Arc`) between the
/// orchestrator and the emergency shutdown supervisor.  Failures are
/// reported as `false` and logged by the implementation.
pub trait Transport: Send + Sync {
    /// Configure and open both links.  Idempotent.
    fn connect(&self, vmc_baud: u32, motion_baud: u32) -> bool;

    fn is_connected(&self) -> bool;

    /// Stop both readers and close both links.  Idempotent.
    fn disconnect(&self);

    /// Write and flush raw bytes.
    fn write_raw(&self, link: Link, bytes: &[u8]) -> bool;

    /// Write an ASCII command verbatim (no terminator is appended).
    fn write_ascii(&self, link: Link, line: &str) -> bool {
        self.write_raw(link, line.as_bytes())
    }

    /// Start delivering inbound chunks of `link` to `callback`.  Replaces any
    /// reader already running on that link.
    fn start_reading(&self, link: Link, callback: FrameCallback) -> bool;

    /// Stop delivery on `link`.  Once this returns the previous callback is
    /// never invoked again.  The link stays open.
    fn stop_reading(&self, link: Link);

    /// Last communication sequence number acknowledged by the VMC (`1..=255`).
    fn sequence(&self) -> u8;

    /// Persist the sequence number.
    fn save_sequence(&self, sequence: u8);
}

// ───────────────────────────────────────────────────────────────
// Port configurator (driven adapter: domain → line discipline)
// ───────────────────────────────────────────────────────────────

/// Prepares a device node before the transport opens it.
pub trait PortConfigurator: Send + Sync {
    fn configure(&self, device: &Path, baud: u32) -> Result<(), Error>;
}

impl<C: PortConfigurator + ?Sized> PortConfigurator for Box<C> {
    fn configure(&self, device: &Path, baud: u32) -> Result<(), Error> {
        (**self).configure(device, baud)
    }
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`DispenseEvent`](super::events::DispenseEvent)s
/// through this port.  Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::DispenseEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists kiosk configuration.
///
/// Implementations MUST validate before persisting.  Invalid ranges are
/// rejected with [`ConfigError::ValidationFailed`], not silently clamped.
pub trait ConfigPort {
    /// Returns [`KioskConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<KioskConfig, ConfigError>;

    fn save(&self, config: &KioskConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ key-value persistence)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage, namespaced per subsystem.
///
/// Write operations MUST be atomic: a crash mid-write leaves either the
/// old or the new value.
pub trait StoragePort: Send {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// No config file found.
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug)]
pub enum StorageError {
    NotFound,
    /// Value larger than the caller's buffer.
    BufferTooSmall,
    IoError,
    /// Backing file exists but is not a valid store.
    Corrupted,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::IoError => write!(f, "I/O error"),
            Self::Corrupted => write!(f, "store corrupted"),
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for StorageError {}
