//! Byte-driven frame decoder.
//!
//! [`FrameDecoder`] is a sans-IO state machine: the caller pushes bytes one
//! at a time as they arrive and owns all timing. When a read times out, the
//! caller inspects [`FrameDecoder::state`] to learn which field stalled and
//! calls [`FrameDecoder::fail`].
//!
//! ```text
//! Idle -> Syncing -> ReadingLength -> ReadingPayload -> ReadingCrc -> ReadingEnd -> Complete
//!            \___________________ any error or timeout ___________________/ -> Failed
//! ```
//!
//! # Invariants
//!
//! - `Failed` is terminal: every push returns `ProtocolError::DecoderFailed`
//!   until [`FrameDecoder::reset`] is called.
//! - `Complete` is left automatically by the next push, which starts a new
//!   frame.
//! - The decoder never consumes more wire bytes than the frame occupies, so
//!   requesting [`FrameDecoder::bytes_needed`] bytes from a stream never
//!   over-reads into the next frame.

use bytes::BytesMut;

use crate::{
    Frame,
    crc::frame_crc16,
    errors::{ProtocolError, Result},
    frame::{ESCAPE, ESCAPE_XOR, FRAME_END, FRAME_START, MAX_PAYLOAD_SIZE},
};

/// Decoder progress through a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoderState {
    /// Nothing pushed yet
    Idle,
    /// Discarding bytes until a start marker
    Syncing,
    /// Reading the 2-byte length
    ReadingLength,
    /// Reading and unescaping the payload
    ReadingPayload,
    /// Reading the 2-byte CRC
    ReadingCrc,
    /// Waiting for the end marker
    ReadingEnd,
    /// A frame was produced
    Complete,
    /// Decoding failed; reset required
    Failed,
}

impl DecoderState {
    /// Frame field the decoder is waiting for, if any.
    #[must_use]
    pub fn field(self) -> Option<FrameField> {
        match self {
            Self::Idle | Self::Syncing => Some(FrameField::Start),
            Self::ReadingLength => Some(FrameField::Length),
            Self::ReadingPayload => Some(FrameField::Payload),
            Self::ReadingCrc => Some(FrameField::Crc),
            Self::ReadingEnd => Some(FrameField::End),
            Self::Complete | Self::Failed => None,
        }
    }
}

/// Fields of a frame, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameField {
    /// Start marker
    Start,
    /// Length
    Length,
    /// Payload
    Payload,
    /// CRC
    Crc,
    /// End marker
    End,
}

impl std::fmt::Display for FrameField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Length => "length",
            Self::Payload => "payload",
            Self::Crc => "crc",
            Self::End => "end",
        };
        f.write_str(name)
    }
}

/// Incremental frame decoder.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    state: DecoderState,
    length_bytes: [u8; 2],
    crc_bytes: [u8; 2],
    /// Bytes of the current 2-byte field received so far
    field_pos: usize,
    length: usize,
    payload: BytesMut,
    escape_pending: bool,
    discarded: usize,
}

impl FrameDecoder {
    /// Creates a decoder in the `Idle` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DecoderState::Idle,
            length_bytes: [0; 2],
            crc_bytes: [0; 2],
            field_pos: 0,
            length: 0,
            payload: BytesMut::new(),
            escape_pending: false,
            discarded: 0,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Bytes discarded while searching for the start marker of the current
    /// (or just completed) frame.
    #[must_use]
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Unescaped payload bytes received for the current frame
    #[must_use]
    pub fn payload_received(&self) -> usize {
        self.payload.len()
    }

    /// Declared payload length of the current frame (0 before it is read)
    #[must_use]
    pub fn declared_length(&self) -> usize {
        self.length
    }

    /// Whether a start marker has been seen and the frame is not finished.
    #[must_use]
    pub fn is_mid_frame(&self) -> bool {
        matches!(
            self.state,
            DecoderState::ReadingLength
                | DecoderState::ReadingPayload
                | DecoderState::ReadingCrc
                | DecoderState::ReadingEnd
        )
    }

    /// Lower bound on wire bytes still needed to finish the current field.
    ///
    /// Zero only in the `Failed` state.
    #[must_use]
    pub fn bytes_needed(&self) -> usize {
        match self.state {
            DecoderState::Idle
            | DecoderState::Syncing
            | DecoderState::ReadingEnd
            | DecoderState::Complete => 1,
            DecoderState::ReadingLength | DecoderState::ReadingCrc => 2 - self.field_pos,
            DecoderState::ReadingPayload => self.length - self.payload.len(),
            DecoderState::Failed => 0,
        }
    }

    /// Returns to `Idle`, dropping any partial frame.
    pub fn reset(&mut self) {
        self.state = DecoderState::Idle;
        self.field_pos = 0;
        self.length = 0;
        self.payload.clear();
        self.escape_pending = false;
        self.discarded = 0;
    }

    /// Marks the decoder failed, e.g. after the caller's read timed out.
    pub fn fail(&mut self) {
        self.state = DecoderState::Failed;
    }

    /// Feeds one wire byte.
    ///
    /// Returns `Ok(Some(frame))` when `byte` completes a valid frame.
    ///
    /// # Errors
    ///
    /// Every error moves the decoder to `Failed`:
    ///
    /// - `ProtocolError::LengthTooLarge` if the length exceeds
    ///   [`MAX_PAYLOAD_SIZE`]
    /// - `ProtocolError::UnexpectedMarker` for a raw marker in the payload
    /// - `ProtocolError::InvalidEscape` for an escape not followed by an
    ///   escaped marker
    /// - `ProtocolError::EndMarkerMismatch` if the end marker is wrong
    /// - `ProtocolError::CrcMismatch` if the CRC does not match
    /// - `ProtocolError::DecoderFailed` if already failed
    pub fn push(&mut self, byte: u8) -> Result<Option<Frame>> {
        match self.step(byte) {
            Ok(frame) => Ok(frame),
            Err(ProtocolError::DecoderFailed) => Err(ProtocolError::DecoderFailed),
            Err(err) => {
                self.state = DecoderState::Failed;
                Err(err)
            },
        }
    }

    fn step(&mut self, byte: u8) -> Result<Option<Frame>> {
        match self.state {
            DecoderState::Failed => Err(ProtocolError::DecoderFailed),
            DecoderState::Complete => {
                self.reset();
                self.step(byte)
            },
            DecoderState::Idle | DecoderState::Syncing => {
                if byte == FRAME_START {
                    self.state = DecoderState::ReadingLength;
                    self.field_pos = 0;
                } else {
                    self.state = DecoderState::Syncing;
                    self.discarded += 1;
                }
                Ok(None)
            },
            DecoderState::ReadingLength => {
                self.length_bytes[self.field_pos] = byte;
                self.field_pos += 1;
                if self.field_pos == 2 {
                    let length = usize::from(u16::from_be_bytes(self.length_bytes));
                    if length > MAX_PAYLOAD_SIZE {
                        return Err(ProtocolError::LengthTooLarge {
                            length,
                            max: MAX_PAYLOAD_SIZE,
                        });
                    }
                    self.length = length;
                    self.payload.reserve(length);
                    self.field_pos = 0;
                    self.state = if length == 0 {
                        DecoderState::ReadingCrc
                    } else {
                        DecoderState::ReadingPayload
                    };
                }
                Ok(None)
            },
            DecoderState::ReadingPayload => {
                if self.escape_pending {
                    let unescaped = byte ^ ESCAPE_XOR;
                    if !matches!(unescaped, FRAME_START | FRAME_END | ESCAPE) {
                        return Err(ProtocolError::InvalidEscape { byte });
                    }
                    self.escape_pending = false;
                    self.payload.extend_from_slice(&[unescaped]);
                } else if byte == ESCAPE {
                    self.escape_pending = true;
                    return Ok(None);
                } else if byte == FRAME_START || byte == FRAME_END {
                    return Err(ProtocolError::UnexpectedMarker { byte });
                } else {
                    self.payload.extend_from_slice(&[byte]);
                }
                if self.payload.len() == self.length {
                    self.state = DecoderState::ReadingCrc;
                }
                Ok(None)
            },
            DecoderState::ReadingCrc => {
                self.crc_bytes[self.field_pos] = byte;
                self.field_pos += 1;
                if self.field_pos == 2 {
                    self.state = DecoderState::ReadingEnd;
                }
                Ok(None)
            },
            DecoderState::ReadingEnd => {
                if byte != FRAME_END {
                    return Err(ProtocolError::EndMarkerMismatch { found: byte });
                }
                let received = u16::from_be_bytes(self.crc_bytes);
                let computed = frame_crc16(&self.payload);
                if received != computed {
                    return Err(ProtocolError::CrcMismatch { received, computed });
                }
                let payload = self.payload.split().freeze();
                self.state = DecoderState::Complete;
                Frame::new(payload).map(Some)
            },
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(decoder: &mut FrameDecoder, bytes: &[u8]) -> Result<Option<Frame>> {
        let mut out = None;
        for &b in bytes {
            if let Some(frame) = decoder.push(b)? {
                out = Some(frame);
            }
        }
        Ok(out)
    }

    #[test]
    fn walks_every_state() {
        let wire = Frame::new(vec![0xAB]).unwrap().to_bytes();
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.state(), DecoderState::Idle);

        let expected = [
            DecoderState::ReadingLength,
            DecoderState::ReadingLength,
            DecoderState::ReadingPayload,
            DecoderState::ReadingCrc,
            DecoderState::ReadingCrc,
            DecoderState::ReadingEnd,
        ];
        for (byte, state) in wire.iter().zip(expected) {
            assert_eq!(decoder.push(*byte).unwrap(), None);
            assert_eq!(decoder.state(), state);
        }
        let frame = decoder.push(wire[wire.len() - 1]).unwrap().unwrap();
        assert_eq!(&frame.payload()[..], &[0xAB]);
        assert_eq!(decoder.state(), DecoderState::Complete);
    }

    #[test]
    fn noise_is_counted() {
        let mut decoder = FrameDecoder::new();
        feed(&mut decoder, &[0x00, 0x7F, 0x7D]).unwrap();
        assert_eq!(decoder.state(), DecoderState::Syncing);
        assert_eq!(decoder.discarded(), 3);
    }

    #[test]
    fn zero_length_skips_payload() {
        let mut decoder = FrameDecoder::new();
        feed(&mut decoder, &[0x7E, 0x00, 0x00]).unwrap();
        assert_eq!(decoder.state(), DecoderState::ReadingCrc);
    }

    #[test]
    fn length_over_max_fails() {
        let mut decoder = FrameDecoder::new();
        let err = feed(&mut decoder, &[0x7E, 0x04, 0x01]).unwrap_err();
        assert_eq!(err, ProtocolError::LengthTooLarge { length: 1025, max: 1024 });
        assert_eq!(decoder.state(), DecoderState::Failed);
    }

    #[test]
    fn failed_requires_reset() {
        let mut decoder = FrameDecoder::new();
        decoder.fail();
        assert_eq!(decoder.push(0x7E), Err(ProtocolError::DecoderFailed));
        assert_eq!(decoder.state(), DecoderState::Failed);

        decoder.reset();
        let wire = Frame::new(vec![1, 2]).unwrap().to_bytes();
        assert!(feed(&mut decoder, &wire).unwrap().is_some());
    }

    #[test]
    fn raw_marker_in_payload_fails() {
        let mut decoder = FrameDecoder::new();
        let err = feed(&mut decoder, &[0x7E, 0x00, 0x02, 0x01, 0x7E]).unwrap_err();
        assert_eq!(err, ProtocolError::UnexpectedMarker { byte: 0x7E });
    }

    #[test]
    fn bad_escape_fails() {
        let mut decoder = FrameDecoder::new();
        let err = feed(&mut decoder, &[0x7E, 0x00, 0x01, 0x7D, 0x41]).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidEscape { byte: 0x41 });
    }

    #[test]
    fn wrong_end_marker_is_not_a_crc_error() {
        let mut wire = Frame::new(vec![9]).unwrap().to_bytes().to_vec();
        let last = wire.len() - 1;
        wire[last] = 0x00;
        let mut decoder = FrameDecoder::new();
        assert_eq!(
            feed(&mut decoder, &wire).unwrap_err(),
            ProtocolError::EndMarkerMismatch { found: 0x00 }
        );
    }

    #[test]
    fn flipped_crc_byte_is_crc_error() {
        let frame = Frame::new(vec![1, 2, 3]).unwrap();
        let mut wire = frame.to_bytes().to_vec();
        let pos = wire.len() - 3;
        wire[pos] ^= 0xFF;
        let mut decoder = FrameDecoder::new();
        let err = feed(&mut decoder, &wire).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::CrcMismatch { computed, .. } if computed == frame.crc()
        ));
    }

    #[test]
    fn bytes_needed_never_overreads() {
        let wire = Frame::new(vec![0x7E, 0x10, 0x7D, 0x20]).unwrap().to_bytes();
        let mut decoder = FrameDecoder::new();
        let mut pos = 0;
        loop {
            let want = decoder.bytes_needed();
            let chunk = &wire[pos..pos + want];
            pos += want;
            if feed(&mut decoder, chunk).unwrap().is_some() {
                break;
            }
        }
        assert_eq!(pos, wire.len());
    }

    #[test]
    fn complete_starts_next_frame() {
        let wire = Frame::new(vec![5]).unwrap().to_bytes();
        let mut decoder = FrameDecoder::new();
        assert!(feed(&mut decoder, &wire).unwrap().is_some());
        assert!(feed(&mut decoder, &wire).unwrap().is_some());
    }
}
