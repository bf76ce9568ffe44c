//! Snapshot tests for wire format stability.
//!
//! Each test pins the exact bytes of one reference frame. If the wire format
//! changes, these fail before a device ever sees the difference.

use bootoracle_proto::{
    Acknowledgment, DataPacket, FlashProgramRequest, Frame, HandshakeRequest, HandshakeResponse,
    Request, RequestBody, Response, ResponseBody, ResultCode, crc16_ccitt,
};
use insta::assert_snapshot;

fn frame_to_hex(frame: &Frame) -> String {
    hex::encode(frame.to_bytes())
}

fn handshake_request() -> Request {
    Request::for_phase(RequestBody::Handshake(HandshakeRequest {
        capabilities: "flash_program,verify,error_recovery".to_string(),
        max_packet_size: 256,
    }))
}

// =============================================================================
// Requests
// =============================================================================

#[test]
fn snapshot_handshake_frame() {
    let frame = handshake_request().to_frame().expect("frame creation should succeed");
    assert_snapshot!(
        frame_to_hex(&frame),
        @"7e002c080112280a23666c6173685f70726f6772616d2c7665726966792c6572726f725f7265636f76657279108002316d7f"
    );
}

#[test]
fn handshake_frame_header_crc() {
    let wire = handshake_request().to_frame().expect("frame creation should succeed").to_bytes();
    let header = &wire[..8];
    assert_eq!(hex::encode(header), "7e002c080112280a");
    assert_eq!(crc16_ccitt(header), 0x5657);
    assert_eq!(crc16_ccitt(&wire[1..wire.len() - 3]), 0x316D);
}

#[test]
fn snapshot_prepare_frame() {
    let frame = Request::for_phase(RequestBody::FlashProgram(FlashProgramRequest::prepare(256)))
        .to_frame()
        .expect("frame creation should succeed");
    assert_snapshot!(frame_to_hex(&frame), @"7e0009080222050880021000a84a7f");
}

#[test]
fn snapshot_data_frame_with_escaped_markers() {
    let packet = DataPacket::new(0, vec![0x7E, 0x7D, 0x7F]);
    let frame = Request::for_phase(RequestBody::Data(packet))
        .to_frame()
        .expect("frame creation should succeed");
    assert_snapshot!(
        frame_to_hex(&frame),
        @"7e001108031a0d080012037d5e7d5d7d5f18deee97d80fb1e87f"
    );
}

// =============================================================================
// Responses
// =============================================================================

#[test]
fn snapshot_ack_frame() {
    let frame = Response {
        sequence_id: 2,
        result: ResultCode::Success,
        body: ResponseBody::Ack(Acknowledgment::accept("ok")),
    }
    .to_frame()
    .expect("frame creation should succeed");
    assert_snapshot!(frame_to_hex(&frame), @"7e000c080210002206080112026f6b249e7f");
}

#[test]
fn snapshot_handshake_response_frame() {
    let frame = Response {
        sequence_id: 1,
        result: ResultCode::Success,
        body: ResponseBody::Handshake(HandshakeResponse {
            bootloader_version: "4.6.3".to_string(),
            supported_capabilities: Some("flash_program,verify".to_string()),
            flash_page_size: 2048,
        }),
    }
    .to_frame()
    .expect("frame creation should succeed");
    assert_snapshot!(
        frame_to_hex(&frame),
        @"7e0026080110001a200a05342e362e331214666c6173685f70726f6772616d2c7665726966791880104af57f"
    );
}
