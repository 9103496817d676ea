//! Wardstock: dispense controller entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Adapters (outer ring)                    │
//! │                                                              │
//! │  SerialTransport    SttyConfigurator   FileStorage           │
//! │  (Transport)        (PortConfigurator) (StoragePort)         │
//! │  JsonConfigFile     LogEventSink                             │
//! │  (ConfigPort)       (EventSink)                              │
//! │                                                              │
//! │  ──────────────── Port Trait Boundary ───────────────────    │
//! │                                                              │
//! │  ┌──────────────────────────────────────────────────────┐    │
//! │  │        Dispenser (FSM · emergency shutdown)          │    │
//! │  └──────────────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Exit status is 0 when the requested operation succeeded, 1 otherwise.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use wardstock::adapters::config_file::JsonConfigFile;
use wardstock::adapters::log_sink::LogEventSink;
use wardstock::adapters::serial::SerialTransport;
use wardstock::adapters::storage::FileStorage;
use wardstock::adapters::stty::{NoopConfigurator, SttyConfigurator};
use wardstock::app::ports::{ConfigPort, PortConfigurator, Transport};
use wardstock::app::service::Dispenser;

#[derive(Parser)]
#[command(name = "wardstock", version, about = "Dispense controller for the Wardstock kiosk")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, short, default_value = "wardstock.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full dispense cycle.
    Dispense {
        #[arg(long)]
        slot: u32,
        #[arg(long, default_value_t = 1)]
        quantity: u32,
    },
    /// Release one unit from a slot through the VMC only.
    TestVmc {
        #[arg(long)]
        slot: u32,
    },
    /// Send a raw motion command and print the reply.
    TestMotion {
        /// Command line as sent on the wire, e.g. "# 1 1 3 1 6".
        command: String,
    },
    /// Show or reset the VMC communication sequence number.
    Sequence {
        #[arg(long)]
        reset: bool,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    info!("Wardstock v{}", env!("CARGO_PKG_VERSION"));

    let config = JsonConfigFile::new(&cli.config)
        .load()
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let storage = FileStorage::open(&config.state_file)
        .with_context(|| format!("opening state file {}", config.state_file))?;
    let configurator: Box<dyn PortConfigurator> = if config.privileged_stty {
        Box::new(SttyConfigurator)
    } else {
        Box::new(NoopConfigurator)
    };
    let transport = Arc::new(SerialTransport::from_config(&config, configurator, storage));
    let mut dispenser = Dispenser::new(Arc::clone(&transport), config, LogEventSink::new());

    if let Command::Sequence { reset } = cli.command {
        if reset {
            dispenser.reset_sequence();
        }
        println!("{}", dispenser.sequence());
        return Ok(true);
    }

    if !dispenser.connect() {
        error!("Could not open serial links");
        return Ok(false);
    }

    let ok = match cli.command {
        Command::Dispense { slot, quantity } => {
            let report = dispenser.dispense_report(quantity, slot);
            println!("dispensed {}/{}", report.dispensed, report.requested);
            report.is_complete()
        }
        Command::TestVmc { slot } => {
            let report = dispenser.test_vmc(slot)?;
            println!(
                "seq {} ack {} status {}",
                report.sequence,
                report.ack_received,
                report
                    .status
                    .as_ref()
                    .map_or_else(|| "none".to_owned(), |f| format!("{:02X?}", f.as_slice()))
            );
            report.dispensed()
        }
        Command::TestMotion { command } => match dispenser.test_motion(&command)? {
            Some(reply) => {
                println!("{}", String::from_utf8_lossy(&reply).escape_debug());
                true
            }
            None => {
                warn!("No reply to {:?}", command);
                false
            }
        },
        Command::Sequence { .. } => true,
    };

    transport.disconnect();
    Ok(ok)
}
