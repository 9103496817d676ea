//! Fuzz target: `MotionDecoder::feed` / `next_reply`
//!
//! cargo fuzz run fuzz_motion_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use wardstock::protocol::motion::{MotionDecoder, MotionResponse, MAX_REPLY};

fuzz_target!(|data: &[u8]| {
    let mut decoder = MotionDecoder::new();
    for chunk in data.chunks(7) {
        decoder.feed(chunk);
        while let Some(reply) = decoder.next_reply() {
            assert!(reply.len() <= MAX_REPLY);
            assert_eq!(reply.first(), Some(&b'&'));
            assert!(reply.ends_with(b"\r\n"));
            let _ = MotionResponse::classify(&reply);
        }
    }
});
