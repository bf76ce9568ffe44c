//! Error types for the oracle runtime.
//!
//! This module provides strongly-typed errors for each layer a response
//! passes through on its way back to the host:
//! - Transport errors (connection, read, write)
//! - Frame errors (sync, per-field timeouts, CRC, end marker)
//! - Message and protocol errors (decode, sequence, phase rejection)
//! - Configuration and hardware errors
//!
//! Every variant maps to a stable upper-snake code via
//! [`OracleError::code`], which is what `ProtocolResult::error_code` carries.

use std::{fmt, io, time::Duration};

use bootoracle_proto::{FrameField, MessageDecodeError, MessageKind, ProtocolError};
use thiserror::Error;

use crate::{client::ClientState, env::Interrupted, hardware::HardwareError};

/// Failures of the byte-stream transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Operation on a closed connection
    #[error("transport is not open")]
    NotOpen,

    /// No bytes arrived within the read timeout
    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    /// Fewer bytes written than requested
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes accepted by the transport
        written: usize,
        /// Bytes requested
        expected: usize,
    },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(String),

    /// A blocking read was cancelled
    #[error("read interrupted")]
    Interrupted,
}

impl From<Interrupted> for TransportError {
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout(Duration::ZERO),
            io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe => Self::NotOpen,
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Every failure the client, injector and orchestrator can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// Connection, read or write failure
    Transport(TransportError),

    /// No start marker arrived in time
    FrameSyncTimeout {
        /// How long we waited
        waited: Duration,
        /// Bytes discarded while waiting
        discarded: usize,
    },

    /// A frame field after the start marker did not arrive in time
    FrameReadTimeout {
        /// Field being read
        field: FrameField,
        /// How long we waited for it
        waited: Duration,
    },

    /// Frame CRC did not match (corruption)
    FrameCrcMismatch {
        /// CRC carried by the frame
        received: u16,
        /// CRC computed locally
        computed: u16,
    },

    /// End marker missing (desync or corruption)
    FrameEndMismatch {
        /// Byte found instead of `0x7F`
        found: u8,
    },

    /// Other structural frame error (length, escape, size)
    Framing(ProtocolError),

    /// Frame payload is not a valid message
    MessageDecode(MessageDecodeError),

    /// Response answers a different request than the one just sent
    SequenceMismatch {
        /// Sequence id sent
        expected: u32,
        /// Sequence id received
        received: u32,
    },

    /// Response variant does not fit the request
    UnexpectedResponse {
        /// Phase the request belonged to
        phase: MessageKind,
        /// Variant actually received
        received: &'static str,
    },

    /// Device rejected a phase
    PhaseFailure {
        /// Rejected phase
        phase: MessageKind,
        /// Device's reason
        reason: String,
    },

    /// Operation not valid in the client's current state
    InvalidState {
        /// Operation attempted
        operation: &'static str,
        /// State the client was in
        state: ClientState,
    },

    /// Unknown scenario or sequence, or invalid parameters
    ScenarioConfig(String),

    /// Hardware collaborator failure
    Hardware(HardwareError),

    /// A wait was interrupted by the cancel token
    Interrupted,
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "transport error: {err}"),
            Self::FrameSyncTimeout { waited, discarded } => write!(
                f,
                "no frame start marker within {waited:?} ({discarded} bytes discarded)"
            ),
            Self::FrameReadTimeout { field, waited } => {
                write!(f, "timed out after {waited:?} reading frame {field}")
            },
            Self::FrameCrcMismatch { received, computed } => write!(
                f,
                "frame CRC mismatch: received {received:#06x}, computed {computed:#06x}"
            ),
            Self::FrameEndMismatch { found } => {
                write!(f, "frame end marker mismatch: found {found:#04x}")
            },
            Self::Framing(err) => write!(f, "framing error: {err}"),
            Self::MessageDecode(err) => write!(f, "{err}"),
            Self::SequenceMismatch { expected, received } => {
                write!(f, "sequence id mismatch: sent {expected}, response carries {received}")
            },
            Self::UnexpectedResponse { phase, received } => {
                write!(f, "unexpected {received} in response to {phase}")
            },
            Self::PhaseFailure { phase, reason } => write!(f, "{phase} rejected: {reason}"),
            Self::InvalidState { operation, state } => {
                write!(f, "cannot {operation} in state {state:?}")
            },
            Self::ScenarioConfig(msg) => write!(f, "scenario configuration error: {msg}"),
            Self::Hardware(err) => write!(f, "hardware error: {err}"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl std::error::Error for OracleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(err) => Some(err),
            Self::Framing(err) => Some(err),
            Self::MessageDecode(err) => Some(err),
            Self::Hardware(err) => Some(err),
            _ => None,
        }
    }
}

impl OracleError {
    /// Stable code for result reporting.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::FrameSyncTimeout { .. } => "FRAME_SYNC_TIMEOUT",
            Self::FrameReadTimeout { .. } => "FRAME_READ_TIMEOUT",
            Self::FrameCrcMismatch { .. } => "FRAME_CRC_MISMATCH",
            Self::FrameEndMismatch { .. } => "FRAME_END_MISMATCH",
            Self::Framing(_) => "FRAMING_ERROR",
            Self::MessageDecode(_) => "MESSAGE_DECODE_ERROR",
            Self::SequenceMismatch { .. } | Self::UnexpectedResponse { .. } => {
                "PROTOCOL_SEQUENCE_ERROR"
            },
            Self::PhaseFailure { .. } => "PHASE_FAILURE",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::ScenarioConfig(_) => "SCENARIO_CONFIG_ERROR",
            Self::Hardware(_) => "HARDWARE_ERROR",
            Self::Interrupted => "INTERRUPTED",
        }
    }

    /// Returns true if re-reading the response may succeed.
    ///
    /// Frame-level timeouts and corruption are transient. Decoded responses
    /// that are wrong, device rejections and transport failures are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::FrameSyncTimeout { .. }
                | Self::FrameReadTimeout { .. }
                | Self::FrameCrcMismatch { .. }
                | Self::FrameEndMismatch { .. }
                | Self::Framing(_)
        )
    }

    /// Whether no response frame arrived at all.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::FrameSyncTimeout { .. }
                | Self::FrameReadTimeout { .. }
                | Self::Transport(TransportError::Timeout(_))
        )
    }
}

/// Splits CRC and end-marker failures out of the generic framing error.
impl From<ProtocolError> for OracleError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::CrcMismatch { received, computed } => {
                Self::FrameCrcMismatch { received, computed }
            },
            ProtocolError::EndMarkerMismatch { found } => Self::FrameEndMismatch { found },
            other => Self::Framing(other),
        }
    }
}

/// Cancellation surfaces as `Interrupted` whichever layer noticed it.
impl From<TransportError> for OracleError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Interrupted => Self::Interrupted,
            other => Self::Transport(other),
        }
    }
}

impl From<MessageDecodeError> for OracleError {
    fn from(err: MessageDecodeError) -> Self {
        Self::MessageDecode(err)
    }
}

impl From<HardwareError> for OracleError {
    fn from(err: HardwareError) -> Self {
        Self::Hardware(err)
    }
}

impl From<Interrupted> for OracleError {
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}

/// Convenient Result type alias for oracle operations
pub type Result<T> = std::result::Result<T, OracleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_errors_are_transient() {
        assert!(
            OracleError::FrameSyncTimeout { waited: Duration::from_secs(1), discarded: 3 }
                .is_transient()
        );
        assert!(
            OracleError::FrameReadTimeout {
                field: FrameField::Payload,
                waited: Duration::from_secs(1)
            }
            .is_transient()
        );
        assert!(OracleError::FrameCrcMismatch { received: 1, computed: 2 }.is_transient());
    }

    #[test]
    fn protocol_violations_are_fatal() {
        assert!(!OracleError::SequenceMismatch { expected: 1, received: 2 }.is_transient());
        assert!(
            !OracleError::PhaseFailure { phase: MessageKind::Prepare, reason: "no".into() }
                .is_transient()
        );
        assert!(!OracleError::Transport(TransportError::NotOpen).is_transient());
        assert!(!OracleError::Interrupted.is_transient());
    }

    #[test]
    fn crc_and_end_errors_keep_their_identity() {
        let crc: OracleError = ProtocolError::CrcMismatch { received: 1, computed: 2 }.into();
        assert_eq!(crc.code(), "FRAME_CRC_MISMATCH");

        let end: OracleError = ProtocolError::EndMarkerMismatch { found: 0 }.into();
        assert_eq!(end.code(), "FRAME_END_MISMATCH");

        let escape: OracleError = ProtocolError::InvalidEscape { byte: 0x41 }.into();
        assert_eq!(escape.code(), "FRAMING_ERROR");
    }

    #[test]
    fn interrupted_reads_are_not_transport_failures() {
        let err: OracleError = TransportError::from(Interrupted).into();
        assert_eq!(err, OracleError::Interrupted);
        assert_eq!(err.code(), "INTERRUPTED");
    }

    #[test]
    fn io_timeouts_become_transport_timeouts() {
        let err: TransportError = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert!(matches!(err, TransportError::Timeout(_)));
    }
}
