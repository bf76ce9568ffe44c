//! Wire protocol for the serial bootloader.
//!
//! This crate is pure: no I/O, no clocks, no logging. It provides
//!
//! - the CRC16/CRC32 checksums the firmware uses ([`crc`])
//! - the escaped, CRC-protected frame format ([`Frame`], [`FrameDecoder`])
//! - the request/response messages carried in frame payloads ([`messages`])
//!
//! Transports, timeouts and session logic live in `bootoracle-core`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod crc;
pub mod decoder;
pub mod errors;
pub mod frame;
pub mod messages;
pub mod wire;

pub use crc::{crc16_ccitt, crc32_bootloader, frame_crc16};
pub use decoder::{DecoderState, FrameDecoder, FrameField};
pub use errors::{DecodeReason, MessageDecodeError, ProtocolError};
pub use frame::{FRAME_END, FRAME_START, Frame, MAX_PAYLOAD_SIZE};
pub use messages::{
    Acknowledgment, DataPacket, FlashProgramRequest, HandshakeRequest, HandshakeResponse,
    MessageKind, Request, RequestBody, Response, ResponseBody, ResultCode,
};
