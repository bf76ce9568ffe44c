//! Structured fuzzer for request encoding.
//!
//! Uses the input to pick a phase and its field values, then checks that
//! the request survives message encoding and framing unchanged.

#![no_main]

use bootoracle_proto::{
    DataPacket, FlashProgramRequest, Frame, HandshakeRequest, MAX_PAYLOAD_SIZE, Request,
    RequestBody,
};
use libfuzzer_sys::fuzz_target;

fn word(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    let n = bytes.len().min(4);
    buf[..n].copy_from_slice(&bytes[..n]);
    u32::from_le_bytes(buf)
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 5 {
        return;
    }
    let value = word(&data[1..5]);
    let rest = &data[5..];

    let body = match data[0] % 4 {
        0 => RequestBody::Handshake(HandshakeRequest {
            capabilities: String::from_utf8_lossy(rest).into_owned(),
            max_packet_size: value,
        }),
        1 => RequestBody::FlashProgram(FlashProgramRequest::prepare(value)),
        2 => RequestBody::Data(DataPacket::new(value, rest.to_vec())),
        _ => RequestBody::FlashProgram(FlashProgramRequest::verify(value)),
    };
    let request = Request::for_phase(body);

    let encoded = request.encode();
    let decoded = Request::decode(&encoded).expect("encoded request must decode");
    assert_eq!(decoded, request);

    match request.to_frame() {
        Ok(frame) => {
            let from_wire = Frame::decode(&frame.to_bytes()).expect("framed request must decode");
            assert_eq!(Request::decode(from_wire.payload()).ok(), Some(request));
        },
        Err(_) => assert!(encoded.len() > MAX_PAYLOAD_SIZE),
    }
});
