//! Line discipline adapters.
//!
//! [`SerialTransport`](super::serial::SerialTransport) sets 8N1 and no flow
//! control itself when it opens a node.  Rooted kiosk images additionally
//! prepare each node as root with `su -c "stty ..."` before it is opened;
//! [`SttyConfigurator`] does that.  Everywhere else [`NoopConfigurator`]
//! only checks that the node exists.

use std::path::Path;
use std::process::Command;

use log::{debug, error};

use crate::app::ports::PortConfigurator;
use crate::error::Error;

/// Runs `stty` as root through `su -c` before the node is opened.
pub struct SttyConfigurator;

impl SttyConfigurator {
    /// Command line handed to `su -c`.
    pub fn command_line(device: &Path, baud: u32) -> String {
        format!(
            "stty -F {} {} cs8 -cstopb -parenb -ixon",
            device.display(),
            baud
        )
    }
}

impl PortConfigurator for SttyConfigurator {
    fn configure(&self, device: &Path, baud: u32) -> Result<(), Error> {
        if !device.exists() {
            error!("Serial device {} does not exist", device.display());
            return Err(Error::PortUnavailable);
        }

        let output = Command::new("su")
            .arg("-c")
            .arg(Self::command_line(device, baud))
            .output();

        match output {
            Ok(out) if out.status.success() => {
                debug!("Configured {} at {} baud", device.display(), baud);
                Ok(())
            }
            Ok(out) => {
                error!(
                    "stty failed on {} ({}): {}",
                    device.display(),
                    out.status,
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                Err(Error::PortUnavailable)
            }
            Err(e) => {
                error!("Could not run stty for {}: {}", device.display(), e);
                Err(Error::PortUnavailable)
            }
        }
    }
}

/// Leaves the device to `serialport`.  Used for nodes the kiosk user can
/// open directly and for pseudo-terminals created by a simulator.
pub struct NoopConfigurator;

impl PortConfigurator for NoopConfigurator {
    fn configure(&self, device: &Path, _baud: u32) -> Result<(), Error> {
        if device.exists() {
            Ok(())
        } else {
            error!("Serial device {} does not exist", device.display());
            Err(Error::PortUnavailable)
        }
    }
}
