//! Error types for the bootloader wire protocol.
//!
//! Frame-level failures ([`ProtocolError`]) and message-level failures
//! ([`MessageDecodeError`]) are separate types so callers can tell a
//! corrupted or desynchronized byte stream apart from a well-framed payload
//! that does not parse.

use bytes::Bytes;
use thiserror::Error;

/// Frame-level errors raised while encoding or decoding the wire format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload exceeds the maximum frame payload size
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Length field on the wire announces more than the maximum payload size
    #[error("declared frame length {length} exceeds maximum {max}")]
    LengthTooLarge {
        /// Length read from the wire
        length: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// CRC recomputed over length and payload does not match the received CRC
    #[error("frame CRC mismatch: received {received:#06x}, computed {computed:#06x}")]
    CrcMismatch {
        /// CRC carried by the frame
        received: u16,
        /// CRC computed over the unescaped payload
        computed: u16,
    },

    /// Byte in the end marker position is not `0x7F`
    #[error("frame end marker mismatch: expected 0x7f, found {found:#04x}")]
    EndMarkerMismatch {
        /// Byte actually found
        found: u8,
    },

    /// Escape byte followed by a byte that does not encode a marker
    #[error("invalid escape sequence: 0x7d followed by {byte:#04x}")]
    InvalidEscape {
        /// Byte following the escape byte
        byte: u8,
    },

    /// Unescaped frame marker found inside the payload
    #[error("unescaped marker {byte:#04x} inside frame payload")]
    UnexpectedMarker {
        /// The marker byte
        byte: u8,
    },

    /// Bytes remain after a complete frame in a single-frame buffer
    #[error("{count} trailing bytes after frame end")]
    TrailingBytes {
        /// Number of unconsumed bytes
        count: usize,
    },

    /// Buffer ended before a complete frame was seen
    #[error("incomplete frame: {received} bytes received")]
    Incomplete {
        /// Number of bytes fed to the decoder
        received: usize,
    },

    /// Decoder was fed after failing without being reset
    #[error("frame decoder is in the failed state and must be reset")]
    DecoderFailed,
}

/// Why a frame payload could not be decoded as a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeReason {
    /// Input ended in the middle of a field
    #[error("truncated input")]
    Truncated,

    /// Varint longer than 10 bytes or wider than 64 bits
    #[error("varint overflow")]
    VarintOverflow,

    /// Field number zero
    #[error("invalid field number 0")]
    InvalidFieldNumber,

    /// Wire type outside of varint, fixed64, length-delimited and fixed32
    #[error("unsupported wire type {0}")]
    UnsupportedWireType(u8),

    /// Known field carried with the wrong wire type
    #[error("field {field} has unexpected wire type")]
    WrongWireType {
        /// Field number
        field: u32,
    },

    /// Numeric value does not fit the field's type
    #[error("field {field} value {value} out of range")]
    OutOfRange {
        /// Field number
        field: u32,
        /// Decoded value
        value: u64,
    },

    /// String field is not valid UTF-8
    #[error("field {field} is not valid UTF-8")]
    InvalidUtf8 {
        /// Field number
        field: u32,
    },

    /// Required field absent
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// Envelope carries no body variant
    #[error("envelope has no body")]
    MissingBody,

    /// Envelope carries more than one body variant
    #[error("envelope has more than one body")]
    MultipleBodies,
}

/// A frame payload that could not be decoded as a protocol message.
///
/// Carries the offending payload so it can be logged or dumped for
/// postmortem analysis.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to decode {message}: {reason} ({} payload bytes)", bytes.len())]
pub struct MessageDecodeError {
    /// Name of the top-level message being decoded
    pub message: &'static str,
    /// What went wrong
    pub reason: DecodeReason,
    /// The payload that failed to decode
    pub bytes: Bytes,
}

impl MessageDecodeError {
    /// Wraps a decode failure with the payload that caused it.
    pub fn new(message: &'static str, reason: DecodeReason, bytes: Bytes) -> Self {
        Self { message, reason, bytes }
    }
}

/// Convenient Result type alias for frame operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
