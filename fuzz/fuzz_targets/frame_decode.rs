//! Arbitrary bus bytes through both decode paths.
//!
//! Every frame the streaming decoder yields must re-encode to bytes with a
//! valid checksum, and a buffer accepted by `Frame::decode` must re-encode to
//! exactly itself.

#![no_main]

use aldl_proto::{Frame, FrameDecoder, checksum};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new();
    for frame in decoder.feed(data).into_iter().flatten() {
        let bytes = frame.to_bytes();
        assert!(checksum::verify(&bytes));
        assert_eq!(bytes.len(), frame.encoded_len());
    }

    if let Ok(frame) = Frame::decode(data) {
        assert_eq!(frame.to_bytes(), data);
    }
});
