//! Application core.
//!
//! The dispense orchestration lives in [`service`]; it talks to the serial
//! links, the state store and the UI only through the **port traits** in
//! [`ports`], so the whole cycle runs against scripted transports in tests.

pub mod events;
pub mod ports;
pub mod service;
