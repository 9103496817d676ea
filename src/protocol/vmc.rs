//! Channel-A packet protocol (vending/slot-release controller, "VMC").
//!
//! Wire format, every frame in both directions:
//! ```text
//! ┌───────┬─────┬─────┬───────────────┬─────┐
//! │ FA FB │ cmd │ len │ payload (len) │ xor │
//! └───────┴─────┴─────┴───────────────┴─────┘
//! ```
//! `xor` is the XOR-fold of every byte before it, start marker included.
//!
//! The VMC drives the exchange: it sends **Poll** continuously, the host
//! answers with either its pending command frame or a bare **Ack**.  A
//! command is confirmed with an **Ack**, and the physical release is
//! reported later with a **DispenseStatus** that the host must ack.

use heapless::Vec;
use log::warn;

use crate::error::CodecError;

/// Two-byte start marker.
pub const START_MARKER: [u8; 2] = [0xFA, 0xFB];

/// VMC request-to-send.
pub const POLL: [u8; 5] = [0xFA, 0xFB, 0x41, 0x00, 0x40];

/// Acknowledge (both directions).  Also the host's keep-alive reply to a
/// Poll when nothing is pending.
pub const ACK: [u8; 5] = [0xFA, 0xFB, 0x42, 0x00, 0x43];

/// Prefix of a dispense status report.  Byte 4 is the unit, byte 5 the status.
pub const DISPENSE_STATUS_PREFIX: [u8; 4] = [0xFA, 0xFB, 0x04, 0x04];

/// Status byte meaning "unit dispensed".
pub const STATUS_DISPENSED: u8 = 0x02;

/// Opcode of the host's dispense command.
const OPCODE_DISPENSE: u8 = 0x06;

/// Payload length of the host's dispense command.
const DISPENSE_PAYLOAD_LEN: u8 = 0x05;

/// Total size of an encoded [`CommandFrame`].
pub const COMMAND_FRAME_LEN: usize = 10;

/// Largest payload the decoder will accept before resynchronising.
const MAX_PAYLOAD: usize = 32;

/// Largest complete frame (marker + cmd + len + payload + xor).
pub const MAX_FRAME: usize = MAX_PAYLOAD + 5;

/// Decoder accumulation buffer.
const DECODER_CAPACITY: usize = 512;

/// XOR-fold of a byte slice.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Next communication sequence number: `255` wraps to `1`, anything else
/// increments.  `0` is never produced.
pub fn next_sequence(current: u8) -> u8 {
    current.checked_add(1).unwrap_or(1)
}

// ---------------------------------------------------------------------------
// Host → VMC command frame
// ---------------------------------------------------------------------------

/// A fully encoded dispense command, immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    bytes: [u8; COMMAND_FRAME_LEN],
}

impl CommandFrame {
    /// Encode a dispense command for one unit of `slot`.
    pub fn encode(
        slot: u32,
        sequence: u8,
        drop_sensor: bool,
        elevator: bool,
    ) -> Result<Self, CodecError> {
        if sequence == 0 {
            return Err(CodecError::InvalidSequence);
        }
        let slot = u16::try_from(slot).map_err(|_| CodecError::SlotOutOfRange)?;
        let [slot_hi, slot_lo] = slot.to_be_bytes();

        let mut bytes = [
            START_MARKER[0],
            START_MARKER[1],
            OPCODE_DISPENSE,
            DISPENSE_PAYLOAD_LEN,
            sequence,
            u8::from(drop_sensor),
            u8::from(elevator),
            slot_hi,
            slot_lo,
            0,
        ];
        bytes[COMMAND_FRAME_LEN - 1] = checksum(&bytes[..COMMAND_FRAME_LEN - 1]);
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn sequence(&self) -> u8 {
        self.bytes[4]
    }

    pub fn slot(&self) -> u16 {
        u16::from_be_bytes([self.bytes[7], self.bytes[8]])
    }
}

// ---------------------------------------------------------------------------
// VMC → host responses
// ---------------------------------------------------------------------------

/// A classified inbound Channel-A frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmcResponse {
    Poll,
    Ack,
    DispenseStatus { unit: u8, status: u8 },
    /// Well-formed frame the dispense protocol does not use.
    Other { command: u8 },
}

impl VmcResponse {
    /// Classify a complete frame.  Poll and Ack match by exact bytes, the
    /// status report by prefix.
    pub fn classify(frame: &[u8]) -> Self {
        if frame == POLL {
            return Self::Poll;
        }
        if frame == ACK {
            return Self::Ack;
        }
        if frame.len() >= 6 && frame.starts_with(&DISPENSE_STATUS_PREFIX) {
            return Self::DispenseStatus {
                unit: frame[4],
                status: frame[5],
            };
        }
        Self::Other {
            command: frame.get(2).copied().unwrap_or(0),
        }
    }

    /// True for a status report whose unit was released.
    pub fn is_dispensed(&self) -> bool {
        matches!(self, Self::DispenseStatus { status, .. } if *status == STATUS_DISPENSED)
    }
}

// ---------------------------------------------------------------------------
// Streaming decoder
// ---------------------------------------------------------------------------

/// A complete raw frame as produced by [`VmcDecoder`].
pub type RawFrame = Vec<u8, MAX_FRAME>;

/// Streaming Channel-A decoder.
///
/// A serial read may hold part of a frame, exactly one, or several
/// concatenated; `feed` accumulates and `next_frame` yields whole frames in
/// arrival order.  Bytes before a start marker are discarded and frames with
/// a bad XOR are dropped.
pub struct VmcDecoder {
    buf: Vec<u8, DECODER_CAPACITY>,
}

impl VmcDecoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append inbound bytes.
    pub fn feed(&mut self, data: &[u8]) {
        if self.buf.extend_from_slice(data).is_err() {
            warn!("VMC decoder overflow, discarding {} buffered bytes", self.buf.len());
            self.buf.clear();
            let keep = data.len().min(DECODER_CAPACITY);
            // Cannot fail: `keep` is bounded by capacity.
            let _ = self.buf.extend_from_slice(&data[data.len() - keep..]);
        }
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<RawFrame> {
        loop {
            self.sync_to_marker();
            if self.buf.len() < 4 {
                return None;
            }

            let payload_len = self.buf[3] as usize;
            if payload_len > MAX_PAYLOAD {
                self.discard(1);
                continue;
            }

            let total = payload_len + 5;
            if self.buf.len() < total {
                return None;
            }

            let expected = checksum(&self.buf[..total - 1]);
            if expected != self.buf[total - 1] {
                warn!(
                    "VMC frame checksum mismatch (got {:02x}, want {:02x}), resyncing",
                    self.buf[total - 1],
                    expected
                );
                self.discard(1);
                continue;
            }

            let mut frame = RawFrame::new();
            // Cannot fail: `total` <= MAX_FRAME.
            let _ = frame.extend_from_slice(&self.buf[..total]);
            self.discard(total);
            return Some(frame);
        }
    }

    /// Forget any partially received frame.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    fn sync_to_marker(&mut self) {
        let start = self
            .buf
            .windows(2)
            .position(|w| w == START_MARKER)
            .unwrap_or_else(|| {
                // Keep a trailing first-marker byte, it may pair with the next read.
                if self.buf.last() == Some(&START_MARKER[0]) {
                    self.buf.len() - 1
                } else {
                    self.buf.len()
                }
            });
        self.discard(start);
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

impl Default for VmcDecoder {
    fn default() -> Self {
        Self::new()
    }
}
