//! Reads one frame from a transport with per-field timeouts.
//!
//! Drives a [`FrameDecoder`] from transport reads. Each field (start
//! marker, length, payload, CRC, end marker) gets its own timeout, started
//! when the decoder begins waiting for that field, so the worst case for one
//! frame is the sum of the field timeouts.

use std::time::Duration;

use bootoracle_proto::{FRAME_START, Frame, FrameDecoder, FrameField, MAX_PAYLOAD_SIZE};

use crate::{
    env::Environment,
    error::{OracleError, Result, TransportError},
    transport::Transport,
};

/// Discarded bytes before a start marker above which a warning is logged
pub const NOISY_LINK_THRESHOLD: usize = 10;

/// Timeout for each field of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTimeouts {
    /// Waiting for the start marker
    pub sync: Duration,
    /// Reading the 2-byte length
    pub length: Duration,
    /// Reading the payload
    pub payload: Duration,
    /// Reading the 2-byte CRC
    pub crc: Duration,
    /// Reading the end marker
    pub end: Duration,
}

impl ReadTimeouts {
    /// Same timeout for every field.
    #[must_use]
    pub const fn uniform(timeout: Duration) -> Self {
        Self { sync: timeout, length: timeout, payload: timeout, crc: timeout, end: timeout }
    }

    /// Timeout for `field`.
    #[must_use]
    pub fn for_field(&self, field: FrameField) -> Duration {
        match field {
            FrameField::Start => self.sync,
            FrameField::Length => self.length,
            FrameField::Payload => self.payload,
            FrameField::Crc => self.crc,
            FrameField::End => self.end,
        }
    }

    /// Longest a single frame read can take.
    #[must_use]
    pub fn worst_case(&self) -> Duration {
        self.sync + self.length + self.payload + self.crc + self.end
    }
}

impl Default for ReadTimeouts {
    fn default() -> Self {
        Self::uniform(Duration::from_secs(1))
    }
}

/// Frame reader owning a decoder and a scratch buffer.
#[derive(Debug)]
pub struct FrameReader {
    decoder: FrameDecoder,
    timeouts: ReadTimeouts,
    scratch: Vec<u8>,
}

impl FrameReader {
    /// Creates a reader with the given timeouts.
    #[must_use]
    pub fn new(timeouts: ReadTimeouts) -> Self {
        Self { decoder: FrameDecoder::new(), timeouts, scratch: vec![0; MAX_PAYLOAD_SIZE] }
    }

    /// Configured timeouts
    #[must_use]
    pub fn timeouts(&self) -> &ReadTimeouts {
        &self.timeouts
    }

    /// Reads the next frame, skipping any leading noise.
    ///
    /// The decoder is reset first, so a previous failure never leaks into
    /// this read.
    ///
    /// # Errors
    ///
    /// - `OracleError::FrameSyncTimeout` if no start marker arrives in time
    /// - `OracleError::FrameReadTimeout` if a later field stalls
    /// - `OracleError::FrameCrcMismatch` / `FrameEndMismatch` / `Framing`
    ///   for invalid frames
    /// - `OracleError::Transport` for transport failures
    /// - `OracleError::Interrupted` if the environment is cancelled
    pub fn read_frame<T, E>(&mut self, transport: &mut T, env: &E) -> Result<Frame>
    where
        T: Transport + ?Sized,
        E: Environment,
    {
        self.decoder.reset();
        let mut field = FrameField::Start;
        let mut field_started = env.now();

        loop {
            if env.is_interrupted() {
                self.decoder.fail();
                return Err(OracleError::Interrupted);
            }

            let current = self.decoder.state().field().unwrap_or(FrameField::Start);
            if current != field {
                field = current;
                field_started = env.now();
            }

            let limit = self.timeouts.for_field(field);
            let waited = env.elapsed_since(field_started);
            let Some(remaining) = limit.checked_sub(waited).filter(|r| !r.is_zero()) else {
                return Err(self.timed_out(field, waited));
            };

            let want = self.decoder.bytes_needed().clamp(1, self.scratch.len());
            let read = match transport.read(&mut self.scratch[..want], remaining) {
                Ok(n) => n,
                Err(TransportError::Timeout(_)) => {
                    let waited = env.elapsed_since(field_started).max(limit);
                    return Err(self.timed_out(field, waited));
                },
                Err(err) => {
                    self.decoder.fail();
                    return Err(err.into());
                },
            };

            for &byte in &self.scratch[..read] {
                if !self.decoder.is_mid_frame() && byte != FRAME_START {
                    tracing::trace!(
                        byte = format_args!("{byte:#04x}"),
                        "discarding byte before start marker"
                    );
                }
                if let Some(frame) = self.decoder.push(byte)? {
                    let discarded = self.decoder.discarded();
                    if discarded > NOISY_LINK_THRESHOLD {
                        tracing::warn!(discarded, "noisy link: discarded bytes before frame");
                    }
                    tracing::debug!(
                        payload_len = frame.payload().len(),
                        discarded,
                        "frame received"
                    );
                    return Ok(frame);
                }
            }
        }
    }

    fn timed_out(&mut self, field: FrameField, waited: Duration) -> OracleError {
        let discarded = self.decoder.discarded();
        self.decoder.fail();
        match field {
            FrameField::Start => {
                tracing::debug!(?waited, discarded, "no start marker before timeout");
                OracleError::FrameSyncTimeout { waited, discarded }
            },
            field => {
                tracing::debug!(%field, ?waited, "frame field timed out");
                OracleError::FrameReadTimeout { field, waited }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_case_is_sum_of_fields() {
        let timeouts = ReadTimeouts::uniform(Duration::from_millis(200));
        assert_eq!(timeouts.worst_case(), Duration::from_secs(1));
    }

    #[test]
    fn per_field_lookup() {
        let timeouts = ReadTimeouts { payload: Duration::from_secs(5), ..ReadTimeouts::default() };
        assert_eq!(timeouts.for_field(FrameField::Payload), Duration::from_secs(5));
        assert_eq!(timeouts.for_field(FrameField::Crc), Duration::from_secs(1));
    }
}
