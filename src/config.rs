//! Kiosk configuration parameters
//!
//! Device nodes, line speeds, slot capacity and every protocol timeout.
//! Values can be overridden from a JSON file (see
//! [`JsonConfigFile`](crate::adapters::config_file::JsonConfigFile)).

use embassy_time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;

/// Core kiosk configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KioskConfig {
    // --- Links ---
    /// Device node of the slot-release controller (Channel A)
    pub vmc_device: String,
    /// Device node of the lift/door controller (Channel B)
    pub motion_device: String,
    /// Channel A line speed
    pub vmc_baud: u32,
    /// Channel B line speed
    pub motion_baud: u32,
    /// Prepare each node with `su -c "stty ..."` before opening (rooted kiosk images)
    pub privileged_stty: bool,

    // --- Machine ---
    /// Highest slot number fitted to this cabinet
    pub slot_capacity: u16,
    /// Ask the VMC to verify the drop with its sensor
    pub drop_sensor: bool,
    /// Ask the VMC to drive its own elevator
    pub elevator: bool,

    // --- Persistence ---
    /// JSON file holding the communication sequence number
    pub state_file: String,

    // --- Timing ---
    pub timing: TimingConfig,
}

/// Protocol timeouts and retry limits, all in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimingConfig {
    /// Default per-command response timeout
    pub communication_timeout_ms: u64,
    /// Door open/close
    pub door_timeout_ms: u64,
    /// Lift travel
    pub lift_timeout_ms: u64,
    /// Mechanical release after the VMC acked a command
    pub dispense_status_timeout_ms: u64,
    /// Ceiling for one whole dispense call
    pub overall_timeout_ms: u64,
    /// Pause between items and before reporting completion
    pub settle_ms: u64,
    /// Timeouts tolerated on a single command before aborting
    pub max_retries: u8,
    /// Emergency shutdown: wait for the lift to reach rest
    pub shutdown_lift_timeout_ms: u64,
    /// Emergency shutdown: wait for the door to close
    pub shutdown_door_timeout_ms: u64,
    /// Diagnostics: wait for the VMC ack of a test command
    pub test_ack_timeout_ms: u64,
    /// Diagnostics: wait for a raw motion reply
    pub test_reply_timeout_ms: u64,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            vmc_device: "/dev/ttyS1".into(),
            motion_device: "/dev/ttyS2".into(),
            vmc_baud: 57_600,
            motion_baud: 9_600,
            privileged_stty: true,

            slot_capacity: 60,
            drop_sensor: false,
            elevator: false,

            state_file: "vending_prefs.json".into(),

            timing: TimingConfig::default(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            communication_timeout_ms: 5_000,
            door_timeout_ms: 7_000,
            lift_timeout_ms: 20_000,
            dispense_status_timeout_ms: 15_000,
            overall_timeout_ms: 120_000,
            settle_ms: 200,
            max_retries: 3,
            shutdown_lift_timeout_ms: 20_000,
            shutdown_door_timeout_ms: 7_000,
            test_ack_timeout_ms: 5_000,
            test_reply_timeout_ms: 5_000,
        }
    }
}

impl TimingConfig {
    pub fn communication(&self) -> Duration {
        Duration::from_millis(self.communication_timeout_ms)
    }

    pub fn door(&self) -> Duration {
        Duration::from_millis(self.door_timeout_ms)
    }

    pub fn lift(&self) -> Duration {
        Duration::from_millis(self.lift_timeout_ms)
    }

    pub fn dispense_status(&self) -> Duration {
        Duration::from_millis(self.dispense_status_timeout_ms)
    }

    pub fn overall(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Range-check a configuration before it is used or persisted.
pub fn validate(cfg: &KioskConfig) -> Result<(), ConfigError> {
    if cfg.vmc_device.is_empty() || cfg.motion_device.is_empty() {
        return Err(ConfigError::ValidationFailed("device paths must not be empty"));
    }
    if cfg.vmc_device == cfg.motion_device {
        return Err(ConfigError::ValidationFailed(
            "vmc_device and motion_device must differ",
        ));
    }
    if cfg.vmc_baud == 0 || cfg.motion_baud == 0 {
        return Err(ConfigError::ValidationFailed("baud rates must be non-zero"));
    }
    if cfg.slot_capacity == 0 {
        return Err(ConfigError::ValidationFailed("slot_capacity must be at least 1"));
    }

    let t = &cfg.timing;
    let per_command = [
        t.communication_timeout_ms,
        t.door_timeout_ms,
        t.lift_timeout_ms,
        t.dispense_status_timeout_ms,
        t.shutdown_lift_timeout_ms,
        t.shutdown_door_timeout_ms,
        t.test_ack_timeout_ms,
        t.test_reply_timeout_ms,
    ];
    if per_command.iter().any(|&ms| ms == 0) {
        return Err(ConfigError::ValidationFailed("timeouts must be non-zero"));
    }
    if t.overall_timeout_ms <= t.lift_timeout_ms {
        return Err(ConfigError::ValidationFailed(
            "overall_timeout_ms must exceed lift_timeout_ms",
        ));
    }
    if t.max_retries > 10 {
        return Err(ConfigError::ValidationFailed("max_retries must be 0-10"));
    }
    Ok(())
}
