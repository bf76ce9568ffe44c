//! Host side of the four-phase flash session.
//!
//! `ProtocolClient` owns one transport for its lifetime and walks it through
//!
//! ```text
//! Disconnected -> Connected -> HandshakeDone -> Prepared -> DataSent -> Verified
//! ```
//!
//! one request/response exchange per transition. Each phase uses its fixed
//! sequence id (handshake 1, prepare 2, data 3, verify 4) and a response
//! echoing any other id is a protocol violation.
//!
//! # Failure semantics
//!
//! Phase operations return [`ProtocolResult`] and never panic. Frame and
//! message errors become that phase's failure. The request is never re-sent;
//! the only repetition is re-reading a response after a transient frame
//! error, bounded by [`RetryPolicy`] (one attempt by default).
//!
//! # Invariants
//!
//! - A phase only runs from the state that precedes it (handshake may run
//!   from any connected state and restarts the session)
//! - A failed phase leaves the state unchanged
//! - The transmission log covers one session: `run_session` clears it

use std::time::{Duration, Instant};

use bootoracle_proto::{
    DataPacket, FlashProgramRequest, HandshakeRequest, MessageKind, Request, RequestBody, Response,
    ResponseBody,
};
use serde_json::Value;

use crate::{
    env::Environment,
    error::{OracleError, Result, TransportError},
    reader::{FrameReader, ReadTimeouts},
    result::{ProtocolResult, TransmissionRecord},
    transport::Transport,
};

/// Capabilities announced in the handshake
pub const DEFAULT_CAPABILITIES: &str = "flash_program,verify,error_recovery";

/// Client session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Transport closed
    Disconnected,
    /// Transport open, no session
    Connected,
    /// Handshake accepted
    HandshakeDone,
    /// Flash write staged
    Prepared,
    /// Data accepted
    DataSent,
    /// Programmed and verified
    Verified,
}

/// How many times to read a response after transient frame errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total read attempts per response (at least 1)
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Read each response once.
    pub const NONE: Self = Self { max_attempts: 1 };

    /// Read each response up to `max_attempts` times.
    #[must_use]
    pub const fn attempts(max_attempts: u32) -> Self {
        Self { max_attempts }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::NONE
    }
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Per-field frame read timeouts
    pub timeouts: ReadTimeouts,
    /// Response re-read policy
    pub retry: RetryPolicy,
    /// Capabilities sent in the handshake
    pub capabilities: String,
    /// Max packet size sent in the handshake
    pub max_packet_size: u32,
    /// Pause after each write before reading the response
    pub inter_frame_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeouts: ReadTimeouts::default(),
            retry: RetryPolicy::default(),
            capabilities: DEFAULT_CAPABILITIES.to_string(),
            max_packet_size: 256,
            inter_frame_delay: Duration::from_millis(10),
        }
    }
}

/// What the device reported in its handshake response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Firmware version
    pub bootloader_version: String,
    /// Capabilities, if reported
    pub supported_capabilities: Option<String>,
    /// Flash page size in bytes
    pub flash_page_size: u32,
}

/// Blocking protocol client over one transport.
pub struct ProtocolClient<T: Transport, E: Environment> {
    transport: T,
    env: E,
    config: ClientConfig,
    reader: FrameReader,
    state: ClientState,
    device: Option<DeviceInfo>,
    staged_length: Option<u32>,
    last_sequence_id: Option<u32>,
    log: Vec<TransmissionRecord>,
}

impl<T: Transport, E: Environment> ProtocolClient<T, E> {
    /// Wraps an open (or closed) transport.
    pub fn new(transport: T, env: E, config: ClientConfig) -> Self {
        let state =
            if transport.is_open() { ClientState::Connected } else { ClientState::Disconnected };
        let reader = FrameReader::new(config.timeouts);
        Self {
            transport,
            env,
            config,
            reader,
            state,
            device: None,
            staged_length: None,
            last_sequence_id: None,
            log: Vec::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Environment used for time and sleeps
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Device details from the last successful handshake
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    /// Length staged by the last successful prepare
    pub fn staged_length(&self) -> Option<u32> {
        self.staged_length
    }

    /// Sequence id of the last request sent
    pub fn last_sequence_id(&self) -> Option<u32> {
        self.last_sequence_id
    }

    /// Frames written since the log was last cleared
    pub fn transmission_log(&self) -> &[TransmissionRecord] {
        &self.log
    }

    /// Empties the transmission log.
    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Whether the transport is open.
    pub fn is_connected(&self) -> bool {
        self.state != ClientState::Disconnected && self.transport.is_open()
    }

    /// Closes the transport.
    ///
    /// # Errors
    ///
    /// `TransportError` if the transport fails to close; the client is
    /// `Disconnected` either way.
    pub fn disconnect(&mut self) -> std::result::Result<(), TransportError> {
        self.state = ClientState::Disconnected;
        self.device = None;
        self.staged_length = None;
        self.transport.close()
    }

    /// Handshake request built from the configuration.
    pub fn handshake_request(&self) -> Request {
        Request::for_phase(RequestBody::Handshake(HandshakeRequest {
            capabilities: self.config.capabilities.clone(),
            max_packet_size: self.config.max_packet_size,
        }))
    }

    /// Opens a session.
    ///
    /// On success records the device's version and flash page size.
    pub fn handshake(&mut self) -> ProtocolResult {
        let request = self.handshake_request();
        let outcome = self.require_connected("handshake").and_then(|()| {
            let response = self.exchange(&request)?;
            match response.body {
                ResponseBody::Handshake(hs) if response.result.is_success() => Ok(DeviceInfo {
                    bootloader_version: hs.bootloader_version,
                    supported_capabilities: hs.supported_capabilities,
                    flash_page_size: hs.flash_page_size,
                }),
                ResponseBody::Handshake(_) => Err(OracleError::PhaseFailure {
                    phase: MessageKind::Handshake,
                    reason: format!("result code {:?}", response.result),
                }),
                other => Err(OracleError::UnexpectedResponse {
                    phase: MessageKind::Handshake,
                    received: other.variant_name(),
                }),
            }
        });

        match outcome {
            Ok(info) => {
                tracing::info!(
                    version = %info.bootloader_version,
                    page_size = info.flash_page_size,
                    "handshake accepted"
                );
                let result = ProtocolResult::ok("handshake accepted")
                    .with_data("bootloader_version", info.bootloader_version.clone())
                    .with_data("flash_page_size", info.flash_page_size);
                self.device = Some(info);
                self.staged_length = None;
                self.state = ClientState::HandshakeDone;
                result
            },
            Err(err) => self.phase_failed(MessageKind::Handshake, &err),
        }
    }

    /// Stages a flash write of `total_data_length` bytes.
    pub fn prepare(&mut self, total_data_length: u32) -> ProtocolResult {
        if let Err(err) = self.require_at_least(ClientState::HandshakeDone, "prepare") {
            return self.phase_failed(MessageKind::Prepare, &err);
        }
        let request = Request::for_phase(RequestBody::FlashProgram(FlashProgramRequest::prepare(
            total_data_length,
        )));
        match self.acknowledged(&request) {
            Ok(message) => {
                self.staged_length = Some(total_data_length);
                self.state = ClientState::Prepared;
                ProtocolResult::ok(format!("prepared {total_data_length} bytes"))
                    .with_data("total_data_length", total_data_length)
                    .with_data("device_message", message)
            },
            Err(err) => self.phase_failed(MessageKind::Prepare, &err),
        }
    }

    /// Sends `data` as one packet at offset 0 with its CRC32.
    pub fn transfer(&mut self, data: &[u8]) -> ProtocolResult {
        if let Err(err) = self.require_state(ClientState::Prepared, "transfer") {
            return self.phase_failed(MessageKind::Data, &err);
        }
        let packet = DataPacket::new(0, data.to_vec());
        let crc = packet.data_crc32;
        let request = Request::for_phase(RequestBody::Data(packet));
        match self.acknowledged(&request) {
            Ok(message) => {
                self.state = ClientState::DataSent;
                ProtocolResult::ok(format!("transferred {} bytes", data.len()))
                    .with_data("bytes_transferred", data.len())
                    .with_data("data_crc32", crc)
                    .with_data("device_message", message)
            },
            Err(err) => self.phase_failed(MessageKind::Data, &err),
        }
    }

    /// Asks the device to program and verify the staged data.
    pub fn verify(&mut self) -> ProtocolResult {
        if let Err(err) = self.require_state(ClientState::DataSent, "verify") {
            return self.phase_failed(MessageKind::Verify, &err);
        }
        let length = self.staged_length.unwrap_or_default();
        let request =
            Request::for_phase(RequestBody::FlashProgram(FlashProgramRequest::verify(length)));
        match self.acknowledged(&request) {
            Ok(message) => {
                self.state = ClientState::Verified;
                ProtocolResult::ok(format!("verified {length} bytes"))
                    .with_data("total_data_length", length)
                    .with_data("device_message", message)
            },
            Err(err) => self.phase_failed(MessageKind::Verify, &err),
        }
    }

    /// Runs handshake, prepare, transfer and verify in order, stopping at
    /// the first failure.
    pub fn run_session(&mut self, data: &[u8]) -> ProtocolResult {
        self.clear_log();
        let Ok(length) = u32::try_from(data.len()) else {
            return ProtocolResult::failed(
                format!("payload of {} bytes does not fit a session", data.len()),
                "PAYLOAD_TOO_LARGE",
            );
        };

        for phase in MessageKind::SESSION {
            let step = match phase {
                MessageKind::Handshake => self.handshake(),
                MessageKind::Prepare => self.prepare(length),
                MessageKind::Data => self.transfer(data),
                MessageKind::Verify => self.verify(),
            };
            if !step.success {
                tracing::warn!(%phase, message = %step.message, "session stopped");
                return ProtocolResult {
                    success: false,
                    message: format!("session stopped at {phase}: {}", step.message),
                    data: None,
                    error_code: step.error_code,
                }
                .with_data("failed_phase", phase.as_str())
                .with_data("transmission_log", self.log_json());
            }
        }

        let total_bytes_sent: usize = self.log.iter().map(|r| r.bytes_written).sum();
        let mut result =
            ProtocolResult::ok(format!("session completed: {} bytes flashed", data.len()))
                .with_data("bytes_transferred", data.len())
                .with_data("frame_count", self.log.len())
                .with_data("total_bytes_sent", total_bytes_sent)
                .with_data("transmission_log", self.log_json());
        if let Some(info) = &self.device {
            result = result
                .with_data("bootloader_version", info.bootloader_version.clone())
                .with_data("flash_page_size", info.flash_page_size);
        }
        tracing::info!(bytes = data.len(), frames = self.log.len(), "session completed");
        result
    }

    /// Writes raw bytes, bypassing framing, and logs the write.
    ///
    /// Used to put malformed traffic on the wire.
    ///
    /// # Errors
    ///
    /// `OracleError::Transport` if the write fails or is short.
    pub fn send_raw(&mut self, wire: &[u8], label: &str) -> Result<usize> {
        self.require_connected("send raw bytes")?;
        self.transport.discard_input()?;
        self.write_logged(wire, label, None, wire.len())
    }

    /// Reads and decodes one response, applying the retry policy.
    ///
    /// # Errors
    ///
    /// The last frame or message error if every attempt fails.
    pub fn receive_response(&mut self) -> Result<Response> {
        let attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.reader.read_frame(&mut self.transport, &self.env) {
                Ok(frame) => return Ok(Response::decode(frame.payload())?),
                Err(err) if err.is_transient() && attempt < attempts => {
                    tracing::debug!(attempt, %err, "re-reading response");
                    attempt += 1;
                },
                Err(err) => return Err(err),
            }
        }
    }

    /// Sends `request` and returns the response answering it.
    fn exchange(&mut self, request: &Request) -> Result<Response> {
        let frame = request.to_frame()?;
        let wire = frame.to_bytes();
        self.transport.discard_input()?;
        self.write_logged(
            &wire,
            request.kind().as_str(),
            Some(request.sequence_id),
            frame.payload().len(),
        )?;
        self.last_sequence_id = Some(request.sequence_id);
        if !self.config.inter_frame_delay.is_zero() {
            self.env.sleep(self.config.inter_frame_delay)?;
        }

        let response = self.receive_response()?;
        if response.sequence_id != request.sequence_id {
            return Err(OracleError::SequenceMismatch {
                expected: request.sequence_id,
                received: response.sequence_id,
            });
        }
        Ok(response)
    }

    /// Exchanges a prepare/data/verify request that expects an ack.
    fn acknowledged(&mut self, request: &Request) -> Result<String> {
        let phase = request.kind();
        let response = self.exchange(request)?;
        match response.body {
            ResponseBody::Ack(ack) if ack.success && response.result.is_success() => {
                Ok(ack.message.unwrap_or_default())
            },
            ResponseBody::Ack(ack) => Err(OracleError::PhaseFailure {
                phase,
                reason: ack
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| format!("result code {:?}", response.result)),
            }),
            other => {
                Err(OracleError::UnexpectedResponse { phase, received: other.variant_name() })
            },
        }
    }

    fn write_logged(
        &mut self,
        wire: &[u8],
        label: &str,
        sequence_id: Option<u32>,
        payload_length: usize,
    ) -> Result<usize> {
        let started: Instant = self.env.now();
        let outcome = self.write_all(wire);
        let elapsed = self.env.elapsed_since(started);
        let (bytes_written, error) = match &outcome {
            Ok(n) => (*n, None),
            Err(err) => (0, Some(err.to_string())),
        };
        tracing::debug!(frame_type = label, ?sequence_id, bytes = wire.len(), "frame sent");
        self.log.push(TransmissionRecord {
            frame_type: label.to_string(),
            sequence_id,
            frame_length_total: wire.len(),
            payload_length,
            bytes_written,
            elapsed,
            success: outcome.is_ok(),
            error,
            hex_preview: TransmissionRecord::preview(wire),
        });
        outcome.map_err(OracleError::from)
    }

    fn write_all(&mut self, wire: &[u8]) -> std::result::Result<usize, TransportError> {
        let written = self.transport.write(wire)?;
        self.transport.flush()?;
        if written != wire.len() {
            return Err(TransportError::ShortWrite { written, expected: wire.len() });
        }
        Ok(written)
    }

    fn phase_failed(&self, phase: MessageKind, err: &OracleError) -> ProtocolResult {
        tracing::warn!(%phase, error = %err, code = err.code(), "phase failed");
        ProtocolResult::from_error(&format!("{phase} failed"), err)
    }

    fn log_json(&self) -> Value {
        serde_json::to_value(&self.log).unwrap_or(Value::Null)
    }

    fn require_connected(&self, operation: &'static str) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(OracleError::InvalidState { operation, state: self.state })
        }
    }

    fn require_state(&self, required: ClientState, operation: &'static str) -> Result<()> {
        self.require_connected(operation)?;
        if self.state == required {
            Ok(())
        } else {
            Err(OracleError::InvalidState { operation, state: self.state })
        }
    }

    fn require_at_least(&self, minimum: ClientState, operation: &'static str) -> Result<()> {
        self.require_connected(operation)?;
        if self.state.rank() >= minimum.rank() {
            Ok(())
        } else {
            Err(OracleError::InvalidState { operation, state: self.state })
        }
    }
}

impl ClientState {
    fn rank(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connected => 1,
            Self::HandshakeDone => 2,
            Self::Prepared => 3,
            Self::DataSent => 4,
            Self::Verified => 5,
        }
    }
}

impl<T: Transport, E: Environment> Drop for ProtocolClient<T, E> {
    fn drop(&mut self) {
        if self.transport.is_open() {
            if let Err(err) = self.transport.close() {
                tracing::error!(error = %err, "failed to close transport");
            }
        }
    }
}

impl<T: Transport, E: Environment> std::fmt::Debug for ProtocolClient<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("state", &self.state)
            .field("device", &self.device)
            .field("staged_length", &self.staged_length)
            .field("frames_logged", &self.log.len())
            .finish_non_exhaustive()
    }
}
