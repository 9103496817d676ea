//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against the scripted transport.  All tests run on the host with no
//! serial hardware required.

mod dispense_flow_tests;
mod mock_transport;
mod shutdown_tests;
mod transport_tests;
