//! Request and response envelopes carried in frame payloads.
//!
//! Schema (field numbers):
//!
//! ```text
//! BootloaderRequest  { 1: sequence_id, oneof { 2: handshake, 3: data, 4: flash_program } }
//! BootloaderResponse { 1: sequence_id, 2: result, oneof { 3: handshake, 4: ack } }
//! ```
//!
//! Verify travels as a `flash_program` request with
//! `verify_after_program = true`. Unknown fields are skipped; an envelope
//! with no body or with two bodies is rejected.

pub mod flash;
pub mod handshake;

use bytes::{Bytes, BytesMut};
use serde::Serialize;

pub use self::{
    flash::{Acknowledgment, DataPacket, FlashProgramRequest},
    handshake::{HandshakeRequest, HandshakeResponse},
};
use crate::{
    Frame,
    errors::{DecodeReason, MessageDecodeError, ProtocolError},
    wire::{FieldReader, put_message_field, put_uint_field, required},
};

/// Field-level encoding shared by every message type.
pub(crate) trait WireMessage: Sized {
    fn encode_fields(&self, dst: &mut BytesMut);
    fn decode_fields(buf: &[u8]) -> Result<Self, DecodeReason>;
}

/// The four session phases, each with its fixed sequence id.
///
/// Sequence id 5 is reserved for recovery messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Capability negotiation
    Handshake,
    /// Stage a flash write
    Prepare,
    /// Transfer program data
    Data,
    /// Program and verify
    Verify,
}

impl MessageKind {
    /// All phases in session order
    pub const SESSION: [Self; 4] = [Self::Handshake, Self::Prepare, Self::Data, Self::Verify];

    /// Sequence id carried by requests of this kind
    #[must_use]
    pub const fn sequence_id(self) -> u32 {
        match self {
            Self::Handshake => 1,
            Self::Prepare => 2,
            Self::Data => 3,
            Self::Verify => 4,
        }
    }

    /// Lower-case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::Prepare => "prepare",
            Self::Data => "data",
            Self::Verify => "verify",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome code in every response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    /// Request handled
    Success,
    /// Framing or transport problem seen by the device
    ErrorCommunication,
    /// Flash erase/program/verify failed
    ErrorFlashOperation,
    /// Data CRC mismatch
    ErrorDataCorruption,
    /// Request not valid in the current state
    ErrorInvalidRequest,
    /// Code this host does not know
    Unknown(u32),
}

impl ResultCode {
    /// Numeric wire value
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        match self {
            Self::Success => 0,
            Self::ErrorCommunication => 1,
            Self::ErrorFlashOperation => 2,
            Self::ErrorDataCorruption => 3,
            Self::ErrorInvalidRequest => 4,
            Self::Unknown(code) => code,
        }
    }

    /// Maps a wire value, preserving unknown codes.
    #[must_use]
    pub const fn from_u32(code: u32) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::ErrorCommunication,
            2 => Self::ErrorFlashOperation,
            3 => Self::ErrorDataCorruption,
            4 => Self::ErrorInvalidRequest,
            other => Self::Unknown(other),
        }
    }

    /// Whether this is [`ResultCode::Success`]
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Body of a host request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// Open a session
    Handshake(HandshakeRequest),
    /// Prepare or verify
    FlashProgram(FlashProgramRequest),
    /// Transfer data
    Data(DataPacket),
}

/// Host-to-device envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Sequence id echoed by the device
    pub sequence_id: u32,
    /// Exactly one request variant
    pub body: RequestBody,
}

impl Request {
    /// Wraps `body` with the sequence id of its phase.
    #[must_use]
    pub fn for_phase(body: RequestBody) -> Self {
        let sequence_id = Self::kind_of(&body).sequence_id();
        Self { sequence_id, body }
    }

    fn kind_of(body: &RequestBody) -> MessageKind {
        match body {
            RequestBody::Handshake(_) => MessageKind::Handshake,
            RequestBody::FlashProgram(req) if req.verify_after_program => MessageKind::Verify,
            RequestBody::FlashProgram(_) => MessageKind::Prepare,
            RequestBody::Data(_) => MessageKind::Data,
        }
    }

    /// Session phase this request belongs to
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        Self::kind_of(&self.body)
    }

    /// Encodes the envelope to a frame payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::new();
        put_uint_field(&mut dst, 1, u64::from(self.sequence_id));
        match &self.body {
            RequestBody::Handshake(msg) => put_message_field(&mut dst, 2, |b| msg.encode_fields(b)),
            RequestBody::Data(msg) => put_message_field(&mut dst, 3, |b| msg.encode_fields(b)),
            RequestBody::FlashProgram(msg) => {
                put_message_field(&mut dst, 4, |b| msg.encode_fields(b));
            },
        }
        dst.freeze()
    }

    /// Decodes a frame payload.
    ///
    /// # Errors
    ///
    /// `MessageDecodeError` carrying `payload` if it is malformed.
    pub fn decode(payload: &[u8]) -> Result<Self, MessageDecodeError> {
        Self::decode_fields(payload).map_err(|reason| {
            MessageDecodeError::new("request", reason, Bytes::copy_from_slice(payload))
        })
    }

    fn decode_fields(buf: &[u8]) -> Result<Self, DecodeReason> {
        let mut sequence_id = None;
        let mut body = None;
        for field in FieldReader::new(buf) {
            let decoded = match field? {
                (1, value) => {
                    sequence_id = Some(value.as_u32(1)?);
                    continue;
                },
                (2, value) => {
                    RequestBody::Handshake(HandshakeRequest::decode_fields(value.as_bytes(2)?)?)
                },
                (3, value) => RequestBody::Data(DataPacket::decode_fields(value.as_bytes(3)?)?),
                (4, value) => RequestBody::FlashProgram(FlashProgramRequest::decode_fields(
                    value.as_bytes(4)?,
                )?),
                _ => continue,
            };
            if body.replace(decoded).is_some() {
                return Err(DecodeReason::MultipleBodies);
            }
        }
        Ok(Self {
            sequence_id: required(sequence_id, "sequence_id")?,
            body: body.ok_or(DecodeReason::MissingBody)?,
        })
    }

    /// Encodes into a frame.
    ///
    /// # Errors
    ///
    /// `ProtocolError::PayloadTooLarge` if the encoded request does not fit.
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        Frame::new(self.encode())
    }
}

/// Body of a device response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Answer to a handshake
    Handshake(HandshakeResponse),
    /// Answer to prepare, data or verify
    Ack(Acknowledgment),
}

impl ResponseBody {
    /// Variant name, for diagnostics
    #[must_use]
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "handshake_response",
            Self::Ack(_) => "ack",
        }
    }
}

/// Device-to-host envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Sequence id of the request being answered
    pub sequence_id: u32,
    /// Device outcome code
    pub result: ResultCode,
    /// Exactly one response variant
    pub body: ResponseBody,
}

impl Response {
    /// Encodes the envelope to a frame payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::new();
        put_uint_field(&mut dst, 1, u64::from(self.sequence_id));
        put_uint_field(&mut dst, 2, u64::from(self.result.to_u32()));
        match &self.body {
            ResponseBody::Handshake(msg) => {
                put_message_field(&mut dst, 3, |b| msg.encode_fields(b));
            },
            ResponseBody::Ack(msg) => put_message_field(&mut dst, 4, |b| msg.encode_fields(b)),
        }
        dst.freeze()
    }

    /// Decodes a frame payload.
    ///
    /// # Errors
    ///
    /// `MessageDecodeError` carrying `payload` if it is malformed.
    pub fn decode(payload: &[u8]) -> Result<Self, MessageDecodeError> {
        Self::decode_fields(payload).map_err(|reason| {
            MessageDecodeError::new("response", reason, Bytes::copy_from_slice(payload))
        })
    }

    fn decode_fields(buf: &[u8]) -> Result<Self, DecodeReason> {
        let mut sequence_id = None;
        let mut result = None;
        let mut body = None;
        for field in FieldReader::new(buf) {
            let decoded = match field? {
                (1, value) => {
                    sequence_id = Some(value.as_u32(1)?);
                    continue;
                },
                (2, value) => {
                    result = Some(ResultCode::from_u32(value.as_u32(2)?));
                    continue;
                },
                (3, value) => {
                    ResponseBody::Handshake(HandshakeResponse::decode_fields(value.as_bytes(3)?)?)
                },
                (4, value) => ResponseBody::Ack(Acknowledgment::decode_fields(value.as_bytes(4)?)?),
                _ => continue,
            };
            if body.replace(decoded).is_some() {
                return Err(DecodeReason::MultipleBodies);
            }
        }
        Ok(Self {
            sequence_id: required(sequence_id, "sequence_id")?,
            result: required(result, "result")?,
            body: body.ok_or(DecodeReason::MissingBody)?,
        })
    }

    /// Encodes into a frame.
    ///
    /// # Errors
    ///
    /// `ProtocolError::PayloadTooLarge` if the encoded response does not fit.
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        Frame::new(self.encode())
    }
}
