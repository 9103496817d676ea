//! Channel-B ASCII motion protocol (lift, door and rack-lock controller).
//!
//! Commands are single ASCII lines `# <axis> <sub> <opcode> <value> <sum>`
//! where `<sum>` is the arithmetic sum of the four fields.  Each completed
//! movement is confirmed by a fixed reply: `&` followed by five CRLF-
//! terminated lines.  Replies are matched verbatim, never parsed.

use core::fmt::Write as _;

use heapless::{String, Vec};
use log::warn;

/// Rack locked (`&1 2 3 1 7`).
pub const REPLY_RACK_LOCKED: &[u8] = b"&1\r\n2\r\n3\r\n1\r\n7\r\n";
/// Door fully open (`&1 2 5 1 9`).
pub const REPLY_DOOR_OPENED: &[u8] = b"&1\r\n2\r\n5\r\n1\r\n9\r\n";
/// Lift reached its commanded height (`&1 2 1 1 5`).  Shared by the shelf,
/// rest and fine-down moves.
pub const REPLY_LIFT_ARRIVED: &[u8] = b"&1\r\n2\r\n1\r\n1\r\n5\r\n";
/// Door fully closed (`&1 2 6 1 10`).
pub const REPLY_DOOR_CLOSED: &[u8] = b"&1\r\n2\r\n6\r\n1\r\n10\r\n";
/// Rack unlocked (`&1 2 3 0 6`).
pub const REPLY_RACK_UNLOCKED: &[u8] = b"&1\r\n2\r\n3\r\n0\r\n6\r\n";

/// Lift height of the resting position used before the fine-down move.
pub const REST_HEIGHT: i32 = 50;

/// Lines in every controller reply.
const REPLY_LINES: usize = 5;

/// Longest reply kept; anything longer is discarded as noise.
pub const MAX_REPLY: usize = 64;

const DECODER_CAPACITY: usize = 256;

const AXIS: i32 = 1;
const SUB: i32 = 1;

const OP_LIFT: i32 = 1;
const OP_RACK: i32 = 3;
const OP_DOOR_OPEN: i32 = 5;
const OP_DOOR_CLOSE: i32 = 6;

const DOOR_TRAVEL: i32 = 10;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// One motion command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionCommand {
    pub opcode: i32,
    pub value: i32,
}

impl MotionCommand {
    pub const fn lock_rack() -> Self {
        Self { opcode: OP_RACK, value: 1 }
    }

    pub const fn unlock_rack() -> Self {
        Self { opcode: OP_RACK, value: 0 }
    }

    pub const fn open_door() -> Self {
        Self { opcode: OP_DOOR_OPEN, value: DOOR_TRAVEL }
    }

    pub const fn close_door() -> Self {
        Self { opcode: OP_DOOR_CLOSE, value: DOOR_TRAVEL }
    }

    /// Raise or lower the lift to an absolute floor height.
    pub const fn lift_to(floor: i32) -> Self {
        Self { opcode: OP_LIFT, value: floor }
    }

    pub const fn lift_to_rest() -> Self {
        Self::lift_to(REST_HEIGHT)
    }

    /// Final fine adjustment from rest down onto the bottom stop.
    pub const fn lift_fine_down() -> Self {
        Self::lift_to(-1)
    }

    pub const fn checksum(&self) -> i32 {
        AXIS + SUB + self.opcode + self.value
    }

    /// ASCII wire form, e.g. `# 1 1 3 1 6`.
    pub fn encode(&self) -> String<32> {
        let mut line = String::new();
        // Cannot overflow: five i32 fields fit in 32 bytes.
        let _ = write!(
            line,
            "# {} {} {} {} {}",
            AXIS,
            SUB,
            self.opcode,
            self.value,
            self.checksum()
        );
        line
    }
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// A classified controller reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionResponse {
    RackLocked,
    DoorOpened,
    LiftArrived,
    DoorClosed,
    RackUnlocked,
    Unrecognized,
}

impl MotionResponse {
    pub fn classify(reply: &[u8]) -> Self {
        match reply {
            REPLY_RACK_LOCKED => Self::RackLocked,
            REPLY_DOOR_OPENED => Self::DoorOpened,
            REPLY_LIFT_ARRIVED => Self::LiftArrived,
            REPLY_DOOR_CLOSED => Self::DoorClosed,
            REPLY_RACK_UNLOCKED => Self::RackUnlocked,
            _ => Self::Unrecognized,
        }
    }
}

/// A complete raw reply as produced by [`MotionDecoder`].
pub type RawReply = Vec<u8, MAX_REPLY>;

/// Streaming Channel-B decoder.  Collects bytes from a `&` until five line
/// terminators have arrived.
pub struct MotionDecoder {
    buf: Vec<u8, DECODER_CAPACITY>,
}

impl MotionDecoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn feed(&mut self, data: &[u8]) {
        if self.buf.extend_from_slice(data).is_err() {
            warn!("motion decoder overflow, discarding {} buffered bytes", self.buf.len());
            self.buf.clear();
        }
    }

    /// Pop the next complete reply, if one is buffered.
    pub fn next_reply(&mut self) -> Option<RawReply> {
        loop {
            let start = self.buf.iter().position(|&b| b == b'&');
            let Some(start) = start else {
                self.buf.clear();
                return None;
            };
            self.discard(start);

            let mut lines = 0;
            let mut end = None;
            for (i, w) in self.buf.windows(2).enumerate() {
                if w == b"\r\n" {
                    lines += 1;
                    if lines == REPLY_LINES {
                        end = Some(i + 2);
                        break;
                    }
                }
            }

            let Some(end) = end else {
                if self.buf.len() > MAX_REPLY {
                    // No terminator in sight, drop this `&` and look for the next.
                    self.discard(1);
                    continue;
                }
                return None;
            };

            if end > MAX_REPLY {
                self.discard(1);
                continue;
            }

            let mut reply = RawReply::new();
            // Cannot fail: `end` <= MAX_REPLY.
            let _ = reply.extend_from_slice(&self.buf[..end]);
            self.discard(end);
            return Some(reply);
        }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    fn discard(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        if n == 0 {
            return;
        }
        let remaining = self.buf.len() - n;
        self.buf.copy_within(n.., 0);
        self.buf.truncate(remaining);
    }
}

impl Default for MotionDecoder {
    fn default() -> Self {
        Self::new()
    }
}
