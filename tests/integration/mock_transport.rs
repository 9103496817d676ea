//! Scripted transport for integration tests.
//!
//! Plays both controllers on the far side of the links:
//!
//! - Channel B answers every motion command with its confirmation reply,
//!   split across two chunks, unless silenced.
//! - Channel A polls every few milliseconds while a reader is attached,
//!   and answers each dispense command with an Ack followed by a status
//!   frame taken from a script.
//!
//! Every write is recorded so tests can assert on the full command history.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use wardstock::app::events::DispenseEvent;
use wardstock::app::ports::{EventSink, FrameCallback, Link, Transport};
use wardstock::protocol::motion::{
    REPLY_DOOR_CLOSED, REPLY_DOOR_OPENED, REPLY_LIFT_ARRIVED, REPLY_RACK_LOCKED,
    REPLY_RACK_UNLOCKED,
};
use wardstock::protocol::vmc::{self, STATUS_DISPENSED};

pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const REPLY_DELAY: Duration = Duration::from_millis(5);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ── Status frame helper ───────────────────────────────────────

pub fn status_frame(unit: u8, status: u8) -> [u8; 9] {
    let mut f = [0xFA, 0xFB, 0x04, 0x04, unit, status, 0x00, 0x00, 0x00];
    f[8] = vmc::checksum(&f[..8]);
    f
}

// ── Shared state ──────────────────────────────────────────────

#[derive(Default)]
struct Inner {
    connected: AtomicBool,
    sequence: AtomicU8,
    vmc_cb: Mutex<Option<FrameCallback>>,
    motion_cb: Mutex<Option<FrameCallback>>,
    /// Bumped on every start/stop so a stale poll thread notices.
    vmc_epoch: AtomicUsize,
    writes: Mutex<Vec<(Link, Vec<u8>)>>,

    motion_silent: AtomicBool,
    /// Motion commands still answered before the controller goes quiet.
    motion_budget: Mutex<Option<usize>>,
    vmc_silent: AtomicBool,
    statuses: Mutex<VecDeque<u8>>,
}

impl Inner {
    fn deliver(&self, link: Link, bytes: &[u8]) {
        let slot = match link {
            Link::Vmc => &self.vmc_cb,
            Link::Motion => &self.motion_cb,
        };
        if let Some(cb) = lock(slot).as_mut() {
            cb(bytes);
        }
    }

    fn motion_reply(line: &str) -> Option<&'static [u8]> {
        let fields: Vec<i32> = line
            .trim_start_matches('#')
            .split_whitespace()
            .filter_map(|f| f.parse().ok())
            .collect();
        match fields.as_slice() {
            [1, 1, 3, 1, _] => Some(REPLY_RACK_LOCKED),
            [1, 1, 3, 0, _] => Some(REPLY_RACK_UNLOCKED),
            [1, 1, 5, _, _] => Some(REPLY_DOOR_OPENED),
            [1, 1, 6, _, _] => Some(REPLY_DOOR_CLOSED),
            [1, 1, 1, _, _] => Some(REPLY_LIFT_ARRIVED),
            _ => None,
        }
    }

    fn answer_motion(self: &Arc<Self>, line: &str) {
        if self.motion_silent.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut budget = lock(&self.motion_budget);
            if let Some(left) = budget.as_mut() {
                if *left == 0 {
                    return;
                }
                *left -= 1;
            }
        }
        let Some(reply) = Self::motion_reply(line) else {
            return;
        };
        let inner = Arc::clone(self);
        thread::spawn(move || {
            thread::sleep(REPLY_DELAY);
            let (a, b) = reply.split_at(reply.len() / 2);
            inner.deliver(Link::Motion, a);
            inner.deliver(Link::Motion, b);
        });
    }

    fn answer_vmc(self: &Arc<Self>, bytes: &[u8]) {
        let is_command = bytes.len() == 10 && bytes[..2] == vmc::START_MARKER && bytes[2] == 0x06;
        if !is_command || self.vmc_silent.load(Ordering::SeqCst) {
            return;
        }
        let status = lock(&self.statuses)
            .pop_front()
            .unwrap_or(STATUS_DISPENSED);
        let inner = Arc::clone(self);
        thread::spawn(move || {
            thread::sleep(REPLY_DELAY);
            inner.deliver(Link::Vmc, &vmc::ACK);
            thread::sleep(REPLY_DELAY);
            inner.deliver(Link::Vmc, &status_frame(1, status));
        });
    }

    fn spawn_poller(self: &Arc<Self>) {
        let epoch = self.vmc_epoch.load(Ordering::SeqCst);
        let inner = Arc::clone(self);
        thread::spawn(move || {
            while inner.vmc_epoch.load(Ordering::SeqCst) == epoch {
                inner.deliver(Link::Vmc, &vmc::POLL);
                thread::sleep(POLL_INTERVAL);
            }
        });
    }
}

// ── MockTransport ─────────────────────────────────────────────

#[derive(Default)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        let t = Self::default();
        t.inner.sequence.store(1, Ordering::SeqCst);
        t
    }

    pub fn connected() -> Self {
        let t = Self::new();
        t.inner.connected.store(true, Ordering::SeqCst);
        t
    }

    pub fn silence_motion(&self) {
        self.inner.motion_silent.store(true, Ordering::SeqCst);
    }

    /// Answer only the next `n` motion commands.
    pub fn answer_motion_times(&self, n: usize) {
        *lock(&self.inner.motion_budget) = Some(n);
    }

    /// Answer every motion command again.
    pub fn restore_motion(&self) {
        self.inner.motion_silent.store(false, Ordering::SeqCst);
        *lock(&self.inner.motion_budget) = None;
    }

    pub fn silence_vmc(&self) {
        self.inner.vmc_silent.store(true, Ordering::SeqCst);
    }

    /// Status bytes reported for successive commands; once exhausted every
    /// command reports success.
    pub fn script_statuses(&self, statuses: &[u8]) {
        lock(&self.inner.statuses).extend(statuses.iter().copied());
    }

    pub fn set_sequence(&self, seq: u8) {
        self.inner.sequence.store(seq, Ordering::SeqCst);
    }

    pub fn sequence_value(&self) -> u8 {
        self.inner.sequence.load(Ordering::SeqCst)
    }

    pub fn motion_lines(&self) -> Vec<String> {
        lock(&self.inner.writes)
            .iter()
            .filter(|(link, _)| *link == Link::Motion)
            .map(|(_, b)| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    /// Dispense command frames written to Channel A, in order.
    pub fn command_frames(&self) -> Vec<Vec<u8>> {
        lock(&self.inner.writes)
            .iter()
            .filter(|(link, b)| *link == Link::Vmc && b.len() == 10)
            .map(|(_, b)| b.clone())
            .collect()
    }

    pub fn acks_sent(&self) -> usize {
        lock(&self.inner.writes)
            .iter()
            .filter(|(link, b)| *link == Link::Vmc && b.as_slice() == vmc::ACK)
            .count()
    }

    pub fn write_count(&self) -> usize {
        lock(&self.inner.writes).len()
    }

    pub fn readers_attached(&self) -> bool {
        lock(&self.inner.vmc_cb).is_some() || lock(&self.inner.motion_cb).is_some()
    }
}

impl Transport for MockTransport {
    fn connect(&self, _vmc_baud: u32, _motion_baud: u32) -> bool {
        self.inner.connected.store(true, Ordering::SeqCst);
        true
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        for link in Link::ALL {
            self.stop_reading(link);
        }
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    fn write_raw(&self, link: Link, bytes: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }
        lock(&self.inner.writes).push((link, bytes.to_vec()));
        match link {
            Link::Vmc => self.inner.answer_vmc(bytes),
            Link::Motion => self.inner.answer_motion(&String::from_utf8_lossy(bytes)),
        }
        true
    }

    fn start_reading(&self, link: Link, callback: FrameCallback) -> bool {
        self.stop_reading(link);
        match link {
            Link::Vmc => {
                *lock(&self.inner.vmc_cb) = Some(callback);
                self.inner.spawn_poller();
            }
            Link::Motion => *lock(&self.inner.motion_cb) = Some(callback),
        }
        true
    }

    fn stop_reading(&self, link: Link) {
        match link {
            Link::Vmc => {
                self.inner.vmc_epoch.fetch_add(1, Ordering::SeqCst);
                *lock(&self.inner.vmc_cb) = None;
            }
            Link::Motion => *lock(&self.inner.motion_cb) = None,
        }
    }

    fn sequence(&self) -> u8 {
        self.inner.sequence.load(Ordering::SeqCst)
    }

    fn save_sequence(&self, sequence: u8) {
        self.inner.sequence.store(sequence, Ordering::SeqCst);
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<DispenseEvent>,
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &DispenseEvent) {
        self.events.push(*event);
    }
}

// ── Test timing ───────────────────────────────────────────────

/// Defaults with every timeout shortened to keep the suite fast.
pub fn fast_config() -> wardstock::config::KioskConfig {
    let mut cfg = wardstock::config::KioskConfig::default();
    let t = &mut cfg.timing;
    t.communication_timeout_ms = 300;
    t.door_timeout_ms = 300;
    t.lift_timeout_ms = 300;
    t.dispense_status_timeout_ms = 300;
    t.overall_timeout_ms = 5_000;
    t.settle_ms = 1;
    t.max_retries = 3;
    t.shutdown_lift_timeout_ms = 300;
    t.shutdown_door_timeout_ms = 300;
    t.test_ack_timeout_ms = 500;
    t.test_reply_timeout_ms = 300;
    cfg
}
