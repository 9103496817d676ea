//! Serial transport adapter.
//!
//! Implements [`Transport`] over two tty device nodes opened with
//! `serialport` at 8N1, no flow control.
//!
//! ```text
//!   write_raw / write_ascii ──▶ Mutex<Box<dyn SerialPort>> ──▶ /dev/ttyS1 (VMC)
//!                                                            /dev/ttyS2 (motion)
//!   reader thread ◀── try_clone() ◀─────────────────────────┘
//!        │
//!        └──▶ FrameCallback (under the `active` lock)
//! ```
//!
//! Each link has at most one reader thread.  The thread delivers a chunk
//! only while holding its `active` flag, and `stop_reading` clears the flag
//! under the same lock and then joins, so no chunk reaches a callback after
//! `stop_reading` returns.  Reads time out after [`READ_TIMEOUT`], which
//! bounds how long a stop can take on an idle line.
//!
//! The communication sequence number lives in a [`StoragePort`].

use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::app::ports::{FrameCallback, Link, PortConfigurator, StoragePort, Transport};
use crate::config::KioskConfig;

/// Storage namespace and key of the sequence number.
pub const SEQUENCE_NAMESPACE: &str = "vending";
pub const SEQUENCE_KEY: &str = "running_counter";

/// Longest a read blocks on an idle line.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

const READ_CHUNK: usize = 256;

/// Back-off when a read returns no data after a hangup.
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Reader {
    active: Arc<Mutex<bool>>,
    thread: JoinHandle<()>,
}

#[derive(Default)]
struct LinkState {
    port: Mutex<Option<Box<dyn SerialPort>>>,
    reader: Mutex<Option<Reader>>,
}

pub struct SerialTransport<C: PortConfigurator, P: StoragePort> {
    vmc_device: PathBuf,
    motion_device: PathBuf,
    configurator: C,
    storage: Mutex<P>,
    connected: AtomicBool,
    vmc: LinkState,
    motion: LinkState,
}

impl<C: PortConfigurator, P: StoragePort> SerialTransport<C, P> {
    pub fn new(
        vmc_device: impl Into<PathBuf>,
        motion_device: impl Into<PathBuf>,
        configurator: C,
        storage: P,
    ) -> Self {
        Self {
            vmc_device: vmc_device.into(),
            motion_device: motion_device.into(),
            configurator,
            storage: Mutex::new(storage),
            connected: AtomicBool::new(false),
            vmc: LinkState::default(),
            motion: LinkState::default(),
        }
    }

    pub fn from_config(config: &KioskConfig, configurator: C, storage: P) -> Self {
        Self::new(
            &config.vmc_device,
            &config.motion_device,
            configurator,
            storage,
        )
    }

    fn link(&self, link: Link) -> &LinkState {
        match link {
            Link::Vmc => &self.vmc,
            Link::Motion => &self.motion,
        }
    }

    fn device(&self, link: Link) -> &Path {
        match link {
            Link::Vmc => &self.vmc_device,
            Link::Motion => &self.motion_device,
        }
    }

    fn open(&self, link: Link, baud: u32) -> bool {
        let device = self.device(link);
        if self.configurator.configure(device, baud).is_err() {
            return false;
        }
        let opened = serialport::new(device.to_string_lossy(), baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open();
        match opened {
            Ok(port) => {
                *lock(&self.link(link).port) = Some(port);
                info!("Opened {} link on {} at {} baud", link.name(), device.display(), baud);
                true
            }
            Err(e) => {
                error!("Cannot open {}: {}", device.display(), e);
                false
            }
        }
    }
}

fn spawn_reader(
    link: Link,
    mut port: Box<dyn SerialPort>,
    mut callback: FrameCallback,
    active: Arc<Mutex<bool>>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("{}-reader", link.name()))
        .spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                if !*lock(&active) {
                    break;
                }
                match port.read(&mut buf) {
                    Ok(0) => thread::sleep(IDLE_BACKOFF),
                    Ok(n) => {
                        let running = lock(&active);
                        if !*running {
                            break;
                        }
                        callback(&buf[..n]);
                    }
                    Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
                    Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(IDLE_BACKOFF),
                    Err(e) => {
                        error!("{} reader stopped: {}", link.name(), e);
                        break;
                    }
                }
            }
            debug!("{} reader exited", link.name());
        })
}

impl<C: PortConfigurator, P: StoragePort> Transport for SerialTransport<C, P> {
    fn connect(&self, vmc_baud: u32, motion_baud: u32) -> bool {
        if self.connected.load(Ordering::SeqCst) {
            return true;
        }
        if !self.open(Link::Vmc, vmc_baud) || !self.open(Link::Motion, motion_baud) {
            self.disconnect();
            return false;
        }
        self.connected.store(true, Ordering::SeqCst);
        true
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        for link in Link::ALL {
            self.stop_reading(link);
            *lock(&self.link(link).port) = None;
        }
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("Serial links closed");
        }
    }

    fn write_raw(&self, link: Link, bytes: &[u8]) -> bool {
        let mut port = lock(&self.link(link).port);
        let Some(port) = port.as_mut() else {
            warn!("{} write while not connected", link.name());
            return false;
        };
        match port.write_all(bytes).and_then(|()| port.flush()) {
            Ok(()) => true,
            Err(e) => {
                error!("{} write failed: {}", link.name(), e);
                false
            }
        }
    }

    fn start_reading(&self, link: Link, callback: FrameCallback) -> bool {
        self.stop_reading(link);

        let clone = match lock(&self.link(link).port).as_ref().map(|p| p.try_clone()) {
            Some(Ok(p)) => p,
            Some(Err(e)) => {
                error!("{} reader: cannot clone handle: {}", link.name(), e);
                return false;
            }
            None => {
                warn!("{} reader requested while not connected", link.name());
                return false;
            }
        };

        let active = Arc::new(Mutex::new(true));
        match spawn_reader(link, clone, callback, Arc::clone(&active)) {
            Ok(thread) => {
                *lock(&self.link(link).reader) = Some(Reader { active, thread });
                true
            }
            Err(e) => {
                error!("{} reader: cannot spawn thread: {}", link.name(), e);
                false
            }
        }
    }

    fn stop_reading(&self, link: Link) {
        let Some(reader) = lock(&self.link(link).reader).take() else {
            return;
        };
        *lock(&reader.active) = false;
        if reader.thread.thread().id() != thread::current().id() && reader.thread.join().is_err() {
            warn!("{} reader panicked", link.name());
        }
    }

    fn sequence(&self) -> u8 {
        let mut buf = [0u8; 1];
        match lock(&self.storage).read(SEQUENCE_NAMESPACE, SEQUENCE_KEY, &mut buf) {
            Ok(1) if buf[0] != 0 => buf[0],
            Ok(_) => 1,
            Err(e) => {
                debug!("No stored sequence ({}), starting at 1", e);
                1
            }
        }
    }

    fn save_sequence(&self, sequence: u8) {
        if let Err(e) = lock(&self.storage).write(SEQUENCE_NAMESPACE, SEQUENCE_KEY, &[sequence]) {
            error!("Failed to persist sequence {}: {}", sequence, e);
        }
    }
}

impl<C: PortConfigurator, P: StoragePort> Drop for SerialTransport<C, P> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
