//! Fuzz target: `VmcDecoder::feed` / `next_frame`
//!
//! Drives arbitrary byte sequences, split at a fuzzer-chosen point, into
//! the Channel-A decoder and asserts every yielded frame is well formed.
//!
//! cargo fuzz run fuzz_vmc_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use wardstock::protocol::vmc::{checksum, VmcDecoder, VmcResponse, MAX_FRAME, START_MARKER};

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let split = usize::from(split).min(rest.len());

    let mut decoder = VmcDecoder::new();
    for chunk in [&rest[..split], &rest[split..]] {
        decoder.feed(chunk);
        while let Some(frame) = decoder.next_frame() {
            assert!(frame.len() >= 5 && frame.len() <= MAX_FRAME);
            assert_eq!(frame[..2], START_MARKER);
            assert_eq!(usize::from(frame[3]) + 5, frame.len());
            assert_eq!(checksum(&frame[..frame.len() - 1]), frame[frame.len() - 1]);
            let _ = VmcResponse::classify(&frame);
        }
    }

    decoder.reset();
    decoder.feed(rest);
    while decoder.next_frame().is_some() {}
});
