//! Property-based tests for the frame codec.
//!
//! - Encode/decode are inverses for every payload size up to the maximum
//! - No marker byte ever appears unescaped between start and end
//! - Leading noise is skipped
//! - Arbitrary input never panics the decoder

use bootoracle_proto::{
    DecoderState, FRAME_END, FRAME_START, Frame, FrameDecoder, MAX_PAYLOAD_SIZE, ProtocolError,
};
use proptest::prelude::*;

// Payloads biased towards marker bytes so escaping is exercised everywhere
fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    let byte = prop_oneof![
        3 => any::<u8>(),
        1 => Just(0x7Eu8),
        1 => Just(0x7Fu8),
        1 => Just(0x7Du8),
    ];
    proptest::collection::vec(byte, 0..=MAX_PAYLOAD_SIZE)
}

// Noise that cannot be mistaken for a start marker
fn noise_strategy() -> impl Strategy<Value = Vec<u8>> {
    let byte = any::<u8>().prop_filter("not a start marker", |b| *b != FRAME_START);
    proptest::collection::vec(byte, 0..300)
}

fn decode_stream(decoder: &mut FrameDecoder, wire: &[u8]) -> Vec<Result<Frame, ProtocolError>> {
    let mut out = Vec::new();
    for &byte in wire {
        match decoder.push(byte) {
            Ok(Some(frame)) => out.push(Ok(frame)),
            Ok(None) => {},
            Err(err) => {
                out.push(Err(err));
                decoder.reset();
            },
        }
    }
    out
}

#[test]
fn prop_roundtrip() {
    proptest!(|(payload in payload_strategy())| {
        let frame = Frame::new(payload.clone()).unwrap();
        let decoded = Frame::decode(&frame.to_bytes()).unwrap();
        prop_assert_eq!(&decoded.payload()[..], &payload[..]);
    });
}

#[test]
fn prop_markers_only_at_boundaries() {
    proptest!(|(payload in payload_strategy())| {
        let wire = Frame::new(payload).unwrap().to_bytes();
        let body = &wire[3..wire.len() - 3];
        prop_assert!(!body.contains(&FRAME_START));
        prop_assert!(!body.contains(&FRAME_END));
        prop_assert_eq!(wire[0], FRAME_START);
        prop_assert_eq!(wire[wire.len() - 1], FRAME_END);
    });
}

#[test]
fn prop_resync_after_noise() {
    proptest!(|(noise in noise_strategy(), payload in payload_strategy())| {
        let mut wire = noise.clone();
        wire.extend_from_slice(&Frame::new(payload.clone()).unwrap().to_bytes());

        let mut decoder = FrameDecoder::new();
        let frames = decode_stream(&mut decoder, &wire);
        prop_assert_eq!(frames.len(), 1);
        let frame = frames.into_iter().next().unwrap().unwrap();
        prop_assert_eq!(&frame.payload()[..], &payload[..]);
        prop_assert_eq!(decoder.discarded(), noise.len());
    });
}

#[test]
fn prop_arbitrary_bytes_never_panic() {
    proptest!(|(wire in proptest::collection::vec(any::<u8>(), 0..4096))| {
        let mut decoder = FrameDecoder::new();
        for frame in decode_stream(&mut decoder, &wire).into_iter().flatten() {
            prop_assert!(frame.payload().len() <= MAX_PAYLOAD_SIZE);
        }
        prop_assert_ne!(decoder.state(), DecoderState::Failed);
    });
}

#[test]
fn resync_with_fixed_noise_lengths() {
    let payload: Vec<u8> = (0..64).collect();
    let frame = Frame::new(payload.clone()).unwrap().to_bytes();
    for n in [0usize, 1, 10, 255] {
        let mut wire: Vec<u8> = (0..n).map(|i| (i % 0x7E) as u8).collect();
        wire.extend_from_slice(&frame);
        let decoded = Frame::decode(&wire).unwrap();
        assert_eq!(&decoded.payload()[..], &payload[..], "noise length {n}");
    }
}

#[test]
fn corrupted_crc_then_valid_frame() {
    let good = Frame::new(vec![1, 2, 3, 4]).unwrap().to_bytes();
    let mut bad = good.to_vec();
    let crc_hi = bad.len() - 3;
    bad[crc_hi] ^= 0xFF;

    let mut wire = bad;
    wire.extend_from_slice(&good);

    let mut decoder = FrameDecoder::new();
    let results = decode_stream(&mut decoder, &wire);
    assert_eq!(results.len(), 2);
    assert!(matches!(results[0], Err(ProtocolError::CrcMismatch { .. })));
    assert_eq!(&results[1].as_ref().unwrap().payload()[..], &[1, 2, 3, 4]);
}
