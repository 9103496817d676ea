//! Wardstock dispense controller library.
//!
//! Exposes the dispense core, the two serial protocols and the host
//! adapters for the binary and for integration testing.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fsm;
pub mod protocol;
pub mod safety;
