//! Fault injection against a live session.
//!
//! Every injector is a two-part check: produce the fault, then prove the
//! device recovered with a clean handshake. The returned [`ProtocolResult`]
//! reports whether the *expected* behavior was observed. A prepare that the
//! device accepts after the session window has expired is a failure, even
//! though the naive operation succeeded.
//!
//! | Method | Fault | Expected | Recovery |
//! |---|---|---|---|
//! | `inject_session_timeout` | idle past the session window | late prepare rejected | handshake |
//! | `inject_handshake_timeout` | idle before the first handshake | informational | none |
//! | `inject_crc_corruption` | handshake with a flipped CRC byte | no valid answer | handshake |
//! | `inject_partial_frame` | `start + length`, then silence | nothing | handshake |

use std::time::Duration;

use bootoracle_proto::{FRAME_END, Response, ResponseBody};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    client::ProtocolClient,
    env::Environment,
    error::{OracleError, Result},
    result::ProtocolResult,
    transport::Transport,
};

/// Length of the prepare staged after a session timeout
const LATE_PREPARE_LENGTH: u32 = 256;

/// Number of frame bytes sent by [`FaultInjector::inject_partial_frame`]
pub const PARTIAL_FRAME_BYTES: usize = 3;

/// Fault injection delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultConfig {
    /// Idle time after the handshake (device window is 30 s)
    pub session_timeout_delay: Duration,
    /// Idle time before the handshake (device window is 2 s)
    pub handshake_timeout_delay: Duration,
    /// Silence after a partial frame
    pub partial_frame_delay: Duration,
    /// Pause before each recovery handshake
    pub recovery_settle: Duration,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            session_timeout_delay: Duration::from_secs(35),
            handshake_timeout_delay: Duration::from_secs(3),
            partial_frame_delay: Duration::from_secs(2),
            recovery_settle: Duration::from_millis(100),
        }
    }
}

/// Kind of fault, for [`FaultInjector::run_recovery_cycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Idle past the session window
    SessionTimeout,
    /// Idle before the first handshake
    HandshakeTimeout,
    /// Corrupted frame CRC
    CrcCorruption,
    /// Truncated frame
    PartialFrame,
}

impl FaultKind {
    /// Lower-case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionTimeout => "session_timeout",
            Self::HandshakeTimeout => "handshake_timeout",
            Self::CrcCorruption => "crc_corruption",
            Self::PartialFrame => "partial_frame",
        }
    }
}

/// Drives a client through deliberate faults.
pub struct FaultInjector<'a, T: Transport, E: Environment> {
    client: &'a mut ProtocolClient<T, E>,
    config: FaultConfig,
}

impl<'a, T: Transport, E: Environment> FaultInjector<'a, T, E> {
    /// Borrows `client` for the duration of the injection.
    pub fn new(client: &'a mut ProtocolClient<T, E>, config: FaultConfig) -> Self {
        Self { client, config }
    }

    /// Configured delays
    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    /// The client being driven
    pub fn client(&mut self) -> &mut ProtocolClient<T, E> {
        &mut *self.client
    }

    /// Handshakes, idles for `delay`, then expects the device to reject a
    /// prepare.
    ///
    /// Fails with `TIMEOUT_NOT_ENFORCED` if the late prepare is accepted, and
    /// with `RECOVERY_FAILED` if a new handshake does not succeed afterwards.
    pub fn inject_session_timeout(&mut self, delay: Duration) -> ProtocolResult {
        tracing::info!(?delay, "injecting session timeout");
        let setup = self.client.handshake();
        if !setup.success {
            return ProtocolResult::failed(
                format!("setup handshake failed: {}", setup.message),
                "SETUP_FAILED",
            );
        }

        if let Err(err) = self.idle(delay) {
            return ProtocolResult::from_error("session timeout wait", &err);
        }

        let late = self.client.prepare(LATE_PREPARE_LENGTH);
        if late.success {
            tracing::warn!(?delay, "device accepted prepare after session window");
            return ProtocolResult::failed(
                format!("device accepted prepare after {delay:?} idle; timeout not enforced"),
                "TIMEOUT_NOT_ENFORCED",
            )
            .with_data("delay_seconds", delay.as_secs_f64())
            .with_data("prepare_accepted", true);
        }

        self.recover(
            ProtocolResult::ok(format!("session timeout enforced after {delay:?}"))
                .with_data("delay_seconds", delay.as_secs_f64())
                .with_data("prepare_accepted", false)
                .with_data("rejection", late.message),
        )
    }

    /// Idles for `delay` before the first handshake and records whether the
    /// device still accepted it.
    ///
    /// Either outcome is reported as success; `handshake_accepted` in the
    /// result data tells which one happened.
    pub fn inject_handshake_timeout(&mut self, delay: Duration) -> ProtocolResult {
        tracing::info!(?delay, "injecting handshake timeout");
        if let Err(err) = self.idle(delay) {
            return ProtocolResult::from_error("handshake timeout wait", &err);
        }

        let attempt = self.client.handshake();
        let result = if attempt.success {
            tracing::warn!(?delay, "device accepted handshake after handshake window");
            ProtocolResult::ok(format!("handshake accepted after {delay:?} delay"))
        } else {
            ProtocolResult::ok(format!("handshake rejected after {delay:?} delay"))
                .with_data("rejection", attempt.message)
        };
        result
            .with_data("delay_seconds", delay.as_secs_f64())
            .with_data("handshake_accepted", attempt.success)
    }

    /// Sends a handshake whose CRC has one byte flipped, expects no valid
    /// answer, then requires a clean handshake to succeed.
    ///
    /// Fails with `CORRUPTION_UNDETECTED` if the device answers the corrupt
    /// frame with a successful handshake.
    pub fn inject_crc_corruption(&mut self) -> ProtocolResult {
        tracing::info!("injecting CRC corruption");
        let wire = match self.corrupted_handshake() {
            Ok(wire) => wire,
            Err(err) => return ProtocolResult::from_error("building corrupted frame", &err),
        };
        if let Err(err) = self.client.send_raw(&wire, "handshake_crc_corrupted") {
            return ProtocolResult::from_error("sending corrupted frame", &err);
        }

        let (detected, outcome) = match self.client.receive_response() {
            Ok(Response { result, body: ResponseBody::Handshake(_), .. })
                if result.is_success() =>
            {
                (false, "device answered corrupted frame with a valid response".to_string())
            },
            Ok(response) => (true, format!("device rejected frame ({:?})", response.result)),
            Err(err) => (true, format!("no valid response: {err}")),
        };
        if !detected {
            tracing::warn!("corrupted handshake was accepted");
            return ProtocolResult::failed(outcome, "CORRUPTION_UNDETECTED")
                .with_data("corruption_detected", false);
        }

        tracing::debug!(%outcome, "corruption detected");
        self.recover(
            ProtocolResult::ok("CRC corruption detected")
                .with_data("corruption_detected", true)
                .with_data("device_behavior", outcome),
        )
    }

    /// Sends only `start + length` of a handshake, stays silent for `delay`,
    /// then requires a clean handshake to succeed.
    pub fn inject_partial_frame(&mut self, delay: Duration) -> ProtocolResult {
        tracing::info!(?delay, "injecting partial frame");
        let partial = match self.client.handshake_request().to_frame() {
            Ok(frame) => frame.to_bytes().slice(..PARTIAL_FRAME_BYTES),
            Err(err) => {
                let err = OracleError::from(err);
                return ProtocolResult::from_error("building partial frame", &err);
            },
        };
        if let Err(err) = self.client.send_raw(&partial, "handshake_partial") {
            return ProtocolResult::from_error("sending partial frame", &err);
        }
        if let Err(err) = self.idle(delay) {
            return ProtocolResult::from_error("partial frame wait", &err);
        }

        self.recover(
            ProtocolResult::ok(format!("partial frame abandoned for {delay:?}"))
                .with_data("partial_bytes_sent", PARTIAL_FRAME_BYTES)
                .with_data("delay_seconds", delay.as_secs_f64()),
        )
    }

    /// Injects `fault` with the configured delay, then runs a full session
    /// with `payload`.
    ///
    /// Succeeds only if the fault behaved as expected and the session
    /// completed.
    pub fn run_recovery_cycle(&mut self, fault: FaultKind, payload: &[u8]) -> ProtocolResult {
        let injected = match fault {
            FaultKind::SessionTimeout => {
                self.inject_session_timeout(self.config.session_timeout_delay)
            },
            FaultKind::HandshakeTimeout => {
                self.inject_handshake_timeout(self.config.handshake_timeout_delay)
            },
            FaultKind::CrcCorruption => self.inject_crc_corruption(),
            FaultKind::PartialFrame => self.inject_partial_frame(self.config.partial_frame_delay),
        };
        let session = self.client.run_session(payload);
        let success = injected.success && session.success;

        let message = if success {
            format!("recovered from {}: {}", fault.as_str(), session.message)
        } else if !injected.success {
            format!("{} injection failed: {}", fault.as_str(), injected.message)
        } else {
            format!("session after {} failed: {}", fault.as_str(), session.message)
        };
        let error_code = if success {
            None
        } else {
            injected.error_code.clone().or_else(|| session.error_code.clone())
        };

        ProtocolResult { success, message, data: None, error_code }
            .with_data("fault", fault.as_str())
            .with_data("injection", to_value(&injected))
            .with_data("session", to_value(&session))
    }

    fn idle(&self, delay: Duration) -> Result<()> {
        self.client.env().sleep(delay)?;
        Ok(())
    }

    /// Wire bytes of a handshake frame with the high CRC byte inverted.
    fn corrupted_handshake(&self) -> Result<Vec<u8>> {
        let frame = self.client.handshake_request().to_frame()?;
        let mut wire = frame.to_bytes().to_vec();
        let crc_high = wire.len() - 3;
        wire[crc_high] ^= 0xFF;
        debug_assert_eq!(wire.last(), Some(&FRAME_END));
        Ok(wire)
    }

    /// Settles, then requires a handshake to succeed.
    fn recover(&mut self, fault: ProtocolResult) -> ProtocolResult {
        if let Err(err) = self.idle(self.config.recovery_settle) {
            return ProtocolResult::from_error("recovery settle", &err);
        }
        let recovery = self.client.handshake();
        if recovery.success {
            tracing::info!(fault = %fault.message, "device recovered");
            return fault.with_data("recovered", true);
        }

        tracing::warn!(message = %recovery.message, "recovery handshake failed");
        let mut failed = ProtocolResult::failed(
            format!("{}, but recovery failed: {}", fault.message, recovery.message),
            "RECOVERY_FAILED",
        );
        failed.data = fault.data;
        failed.with_data("recovered", false)
    }
}

fn to_value(result: &ProtocolResult) -> Value {
    serde_json::to_value(result).unwrap_or(Value::Null)
}
