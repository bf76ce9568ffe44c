//! Wire frame: markers, escaping and encoding.
//!
//! Layout on the wire:
//!
//! ```text
//! 0x7E | length: u16 BE | escaped payload | crc16: u16 BE | 0x7F
//! ```
//!
//! `length` is the unescaped payload length and `crc16` covers
//! `length_be16 || payload` before escaping. Inside the payload, each of
//! `0x7E`, `0x7F` and `0x7D` is sent as `0x7D, byte ^ 0x20`. The length and
//! CRC fields are sent raw.
//!
//! Decoding lives in [`crate::FrameDecoder`]; [`Frame::decode`] is a
//! convenience for buffers holding exactly one frame.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    FrameDecoder,
    crc::frame_crc16,
    errors::{ProtocolError, Result},
};

/// Start-of-frame marker
pub const FRAME_START: u8 = 0x7E;

/// End-of-frame marker
pub const FRAME_END: u8 = 0x7F;

/// Escape byte inside the payload
pub const ESCAPE: u8 = 0x7D;

/// Value XORed into an escaped byte
pub const ESCAPE_XOR: u8 = 0x20;

/// Maximum unescaped payload length
pub const MAX_PAYLOAD_SIZE: usize = 1024;

/// Bytes a frame adds around its payload when nothing needs escaping
pub const FRAME_OVERHEAD: usize = 6;

/// Whether `byte` must be escaped when it appears in a payload.
#[must_use]
pub const fn needs_escape(byte: u8) -> bool {
    matches!(byte, FRAME_START | FRAME_END | ESCAPE)
}

/// Appends `payload` to `dst` with every marker byte escaped.
pub fn escape_into(payload: &[u8], dst: &mut impl BufMut) {
    for &byte in payload {
        if needs_escape(byte) {
            dst.put_u8(ESCAPE);
            dst.put_u8(byte ^ ESCAPE_XOR);
        } else {
            dst.put_u8(byte);
        }
    }
}

/// A single protocol frame, holding the unescaped payload.
///
/// # Invariants
///
/// - `payload.len() <= MAX_PAYLOAD_SIZE`, enforced by [`Frame::new`] and by
///   the decoder, so encoding cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    /// Creates a frame around `payload`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if the payload exceeds
    ///   [`MAX_PAYLOAD_SIZE`]
    pub fn new(payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self { payload })
    }

    /// Unescaped payload
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consumes the frame, returning its payload
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Frame CRC carried on the wire
    #[must_use]
    pub fn crc(&self) -> u16 {
        frame_crc16(&self.payload)
    }

    /// Number of bytes [`Frame::encode`] writes, escapes included
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let escapes = self.payload.iter().filter(|&&b| needs_escape(b)).count();
        FRAME_OVERHEAD + self.payload.len() + escapes
    }

    /// Writes the frame in wire format to `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(FRAME_START);
        dst.put_u16(self.payload.len() as u16);
        escape_into(&self.payload, dst);
        dst.put_u16(self.crc());
        dst.put_u8(FRAME_END);
    }

    /// Encodes into a freshly allocated buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decodes a buffer holding exactly one frame, optionally preceded by
    /// noise.
    ///
    /// # Errors
    ///
    /// - Any error from [`FrameDecoder::push`]
    /// - `ProtocolError::Incomplete` if the buffer ends mid-frame
    /// - `ProtocolError::TrailingBytes` if bytes follow the end marker
    pub fn decode(wire: &[u8]) -> Result<Self> {
        let mut decoder = FrameDecoder::new();
        for (i, &byte) in wire.iter().enumerate() {
            if let Some(frame) = decoder.push(byte)? {
                let rest = wire.len() - i - 1;
                if rest > 0 {
                    return Err(ProtocolError::TrailingBytes { count: rest });
                }
                return Ok(frame);
            }
        }
        Err(ProtocolError::Incomplete { received: wire.len() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_layout() {
        let frame = Frame::new(Bytes::new()).unwrap();
        let wire = frame.to_bytes();
        let crc = frame_crc16(&[]).to_be_bytes();
        assert_eq!(&wire[..], &[0x7E, 0x00, 0x00, crc[0], crc[1], 0x7F]);
        assert_eq!(frame.encoded_len(), FRAME_OVERHEAD);
    }

    #[test]
    fn markers_are_escaped() {
        let frame = Frame::new(vec![0x7E, 0x01, 0x7F, 0x7D]).unwrap();
        let wire = frame.to_bytes();
        assert_eq!(&wire[1..3], &[0x00, 0x04]);
        assert_eq!(&wire[3..10], &[0x7D, 0x5E, 0x01, 0x7D, 0x5F, 0x7D, 0x5D]);
        assert_eq!(wire.len(), frame.encoded_len());
    }

    #[test]
    fn crc_is_computed_before_escaping() {
        let payload = vec![0x7E, 0x7F];
        let frame = Frame::new(payload.clone()).unwrap();
        let wire = frame.to_bytes();
        let crc = u16::from_be_bytes([wire[wire.len() - 3], wire[wire.len() - 2]]);
        assert_eq!(crc, frame_crc16(&payload));
    }

    #[test]
    fn oversized_payload_rejected() {
        let err = Frame::new(vec![0u8; MAX_PAYLOAD_SIZE + 1]).unwrap_err();
        assert_eq!(err, ProtocolError::PayloadTooLarge { size: 1025, max: 1024 });
    }

    #[test]
    fn max_payload_accepted() {
        assert!(Frame::new(vec![0u8; MAX_PAYLOAD_SIZE]).is_ok());
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut wire = Frame::new(vec![1, 2, 3]).unwrap().to_bytes().to_vec();
        wire.push(0x00);
        assert_eq!(Frame::decode(&wire), Err(ProtocolError::TrailingBytes { count: 1 }));
    }

    #[test]
    fn decode_reports_incomplete() {
        assert_eq!(
            Frame::decode(&[0x7E, 0x00, 0x20]),
            Err(ProtocolError::Incomplete { received: 3 })
        );
    }
}
