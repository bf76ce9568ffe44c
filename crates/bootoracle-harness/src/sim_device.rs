//! Simulated bootloader.
//!
//! `SimDevice` is a sans-IO model of the firmware side of the protocol. The
//! transport feeds it host bytes with the current virtual time and collects
//! whatever it queues in reply. It models:
//!
//! - the 30 s session window and 2 s handshake window, each enforceable
//! - silent drop of frames with a bad CRC
//! - discard of a partial frame that stalls for longer than `frame_timeout`
//! - a 2 KiB flash region, written on verify
//!
//! and a few misbehaviors, selected through [`DeviceFaults`]. Line noise is
//! drawn from the [`SimEnv`] RNG, so it follows the simulation seed.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use bootoracle_core::env::Environment;
use bootoracle_proto::{
    Acknowledgment, DataPacket, FRAME_END, FRAME_START, Frame, FrameDecoder, HandshakeResponse,
    MessageKind, ProtocolError, Request, RequestBody, Response, ResponseBody, ResultCode,
};
use bytes::Bytes;

use crate::sim_env::SimEnv;

/// Device shared between a transport and the test.
pub type SharedDevice = Arc<Mutex<SimDevice>>;

/// Firmware parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Idle time after which a session expires
    pub session_timeout: Duration,
    /// Whether expired sessions reject requests
    pub enforce_session_timeout: bool,
    /// Time after boot within which the first handshake must arrive
    pub handshake_window: Duration,
    /// Whether a late first handshake makes the bootloader exit
    pub enforce_handshake_window: bool,
    /// Stall after which a partial frame is dropped
    pub frame_timeout: Duration,
    /// Reported firmware version
    pub bootloader_version: String,
    /// Reported capabilities
    pub supported_capabilities: Option<String>,
    /// Reported page size
    pub flash_page_size: u32,
    /// Address of the first flash byte
    pub flash_base: u32,
    /// Size of the flash region
    pub flash_size: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(30),
            enforce_session_timeout: true,
            handshake_window: Duration::from_secs(2),
            enforce_handshake_window: true,
            frame_timeout: Duration::from_millis(500),
            bootloader_version: "4.6.3".to_string(),
            supported_capabilities: Some("flash_program,verify".to_string()),
            flash_page_size: 2048,
            flash_base: 0x0801_F800,
            flash_size: 2048,
        }
    }
}

/// Misbehaviors to inject on the device side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFaults {
    /// Reject every request of this phase
    pub reject_phase: Option<MessageKind>,
    /// Answer with a sequence id other than the request's
    pub wrong_sequence_id: bool,
    /// Random non-marker bytes sent before each response
    pub response_noise: usize,
    /// Answer corrupted frames with an error ack instead of staying silent
    pub nack_corrupted_frames: bool,
}

/// Counters of what the device saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Frames decoded
    pub frames_received: usize,
    /// Frames dropped for a CRC mismatch
    pub crc_errors: usize,
    /// Partial frames dropped after a stall or a new start marker
    pub partial_frames_dropped: usize,
    /// Other framing errors
    pub framing_errors: usize,
    /// Requests handled, in order
    pub requests: Vec<MessageKind>,
    /// Requests rejected because the session had expired
    pub session_timeouts: usize,
    /// Times the bootloader exited because the first handshake was late
    pub handshake_window_expirations: usize,
    /// Successful flash programs
    pub flash_writes: usize,
}

type Outcome = Result<String, (ResultCode, String)>;

#[derive(Debug, Clone)]
struct Session {
    last_activity: Instant,
    staged: Option<u32>,
    data: Option<Bytes>,
}

/// Model of the bootloader firmware.
#[derive(Debug)]
pub struct SimDevice {
    config: DeviceConfig,
    env: SimEnv,
    faults: DeviceFaults,
    decoder: FrameDecoder,
    last_byte_at: Option<Instant>,
    booted_at: Instant,
    handshaken: bool,
    exited: bool,
    session: Option<Session>,
    session_expired: bool,
    flash: Vec<u8>,
    output: VecDeque<u8>,
    stats: DeviceStats,
}

impl SimDevice {
    /// Boots a device with erased flash at the current time of `env`.
    pub fn new(config: DeviceConfig, env: &SimEnv) -> Self {
        let flash = vec![0xFF; config.flash_size];
        Self {
            config,
            env: env.clone(),
            faults: DeviceFaults::default(),
            decoder: FrameDecoder::new(),
            last_byte_at: None,
            booted_at: env.now(),
            handshaken: false,
            exited: false,
            session: None,
            session_expired: false,
            flash,
            output: VecDeque::new(),
            stats: DeviceStats::default(),
        }
    }

    /// Wraps the device for sharing with a transport.
    pub fn shared(self) -> SharedDevice {
        Arc::new(Mutex::new(self))
    }

    /// Replaces the injected misbehaviors.
    pub fn set_faults(&mut self, faults: DeviceFaults) {
        self.faults = faults;
    }

    /// Configuration
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Counters
    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    /// Whether the bootloader has exited and stopped answering
    pub fn has_exited(&self) -> bool {
        self.exited
    }

    /// Whether a session is open (expired or not)
    pub fn in_session(&self) -> bool {
        self.session.is_some()
    }

    /// Whole flash region
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// Reboots into the bootloader. Flash survives; everything else resets.
    pub fn reset(&mut self, now: Instant) {
        tracing::debug!("simulated device reset");
        self.decoder.reset();
        self.last_byte_at = None;
        self.booted_at = now;
        self.handshaken = false;
        self.exited = false;
        self.session = None;
        self.session_expired = false;
        self.output.clear();
    }

    /// Reads `length` bytes at an absolute flash address.
    pub fn read_flash(&self, address: u32, length: usize) -> Option<Bytes> {
        let range = self.flash_range(address, length)?;
        Some(Bytes::copy_from_slice(&self.flash[range]))
    }

    /// Writes `data` at an absolute flash address.
    ///
    /// Returns false if the range falls outside the flash region.
    pub fn write_flash(&mut self, address: u32, data: &[u8]) -> bool {
        match self.flash_range(address, data.len()) {
            Some(range) => {
                self.flash[range].copy_from_slice(data);
                true
            },
            None => false,
        }
    }

    fn flash_range(&self, address: u32, length: usize) -> Option<std::ops::Range<usize>> {
        let start = usize::try_from(address.checked_sub(self.config.flash_base)?).ok()?;
        let end = start.checked_add(length)?;
        (end <= self.flash.len()).then_some(start..end)
    }

    /// Feeds host bytes that arrived at `now`.
    pub fn receive(&mut self, bytes: &[u8], now: Instant) {
        if self.exited {
            return;
        }
        for &byte in bytes {
            self.drop_stalled_frame(now);
            self.last_byte_at = Some(now);
            self.push_byte(byte, now);
        }
    }

    /// Takes up to `max` queued response bytes.
    pub fn take_output(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.output.len());
        self.output.drain(..n).collect()
    }

    /// Number of queued response bytes
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    /// Drops queued response bytes.
    pub fn clear_output(&mut self) {
        self.output.clear();
    }

    fn drop_stalled_frame(&mut self, now: Instant) {
        if !self.decoder.is_mid_frame() {
            return;
        }
        let stalled = self
            .last_byte_at
            .is_some_and(|last| now.saturating_duration_since(last) > self.config.frame_timeout);
        if stalled {
            tracing::debug!("dropping stalled partial frame");
            self.stats.partial_frames_dropped += 1;
            self.decoder.reset();
        }
    }

    fn push_byte(&mut self, byte: u8, now: Instant) {
        match self.decoder.push(byte) {
            Ok(Some(frame)) => self.handle_frame(&frame, now),
            Ok(None) => {},
            Err(ProtocolError::CrcMismatch { received, computed }) => {
                self.decoder.reset();
                self.stats.crc_errors += 1;
                tracing::debug!(received, computed, "dropping frame with bad CRC");
                if self.faults.nack_corrupted_frames {
                    self.respond(Response {
                        sequence_id: 0,
                        result: ResultCode::ErrorCommunication,
                        body: ResponseBody::Ack(Acknowledgment::reject("CRC mismatch")),
                    });
                }
            },
            Err(ProtocolError::UnexpectedMarker { byte: FRAME_START }) => {
                self.stats.partial_frames_dropped += 1;
                self.decoder.reset();
                // the marker starts the next frame
                if let Err(err) = self.decoder.push(byte) {
                    tracing::debug!(error = %err, "start marker rejected after reset");
                    self.stats.framing_errors += 1;
                    self.decoder.reset();
                }
            },
            Err(err) => {
                tracing::debug!(error = %err, "framing error");
                self.stats.framing_errors += 1;
                self.decoder.reset();
            },
        }
    }

    fn handle_frame(&mut self, frame: &Frame, now: Instant) {
        self.stats.frames_received += 1;
        let request = match Request::decode(frame.payload()) {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(error = %err, "undecodable request");
                self.respond(Response {
                    sequence_id: 0,
                    result: ResultCode::ErrorInvalidRequest,
                    body: ResponseBody::Ack(Acknowledgment::reject("malformed request")),
                });
                return;
            },
        };
        let kind = request.kind();
        self.stats.requests.push(kind);
        self.expire_session(now);

        let (result, body) = match &request.body {
            RequestBody::Handshake(_) => match self.handshake(now) {
                Some(answer) => answer,
                None => return,
            },
            RequestBody::FlashProgram(req) if req.verify_after_program => {
                self.with_session(kind, now, |device, session| device.verify(session))
            },
            RequestBody::FlashProgram(req) => {
                let length = req.total_data_length;
                self.with_session(kind, now, |device, session| device.prepare(session, length))
            },
            RequestBody::Data(packet) => {
                self.with_session(kind, now, |_, session| Self::data(session, packet))
            },
        };

        let sequence_id = if self.faults.wrong_sequence_id {
            request.sequence_id.wrapping_add(100)
        } else {
            request.sequence_id
        };
        self.respond(Response { sequence_id, result, body });
    }

    fn expire_session(&mut self, now: Instant) {
        let Some(session) = &self.session else {
            return;
        };
        let idle = now.saturating_duration_since(session.last_activity);
        if self.config.enforce_session_timeout && idle > self.config.session_timeout {
            tracing::debug!(?idle, "session expired");
            self.session = None;
            self.session_expired = true;
            self.stats.session_timeouts += 1;
        }
    }

    /// Returns `None` when the bootloader exits instead of answering.
    fn handshake(&mut self, now: Instant) -> Option<(ResultCode, ResponseBody)> {
        let since_boot = now.saturating_duration_since(self.booted_at);
        if !self.handshaken
            && self.config.enforce_handshake_window
            && since_boot > self.config.handshake_window
        {
            tracing::debug!(?since_boot, "handshake window missed; bootloader exits");
            self.stats.handshake_window_expirations += 1;
            self.exited = true;
            self.decoder.reset();
            return None;
        }

        let body = ResponseBody::Handshake(HandshakeResponse {
            bootloader_version: self.config.bootloader_version.clone(),
            supported_capabilities: self.config.supported_capabilities.clone(),
            flash_page_size: self.config.flash_page_size,
        });
        if self.faults.reject_phase == Some(MessageKind::Handshake) {
            return Some((ResultCode::ErrorInvalidRequest, body));
        }
        self.handshaken = true;
        self.session_expired = false;
        self.session = Some(Session { last_activity: now, staged: None, data: None });
        Some((ResultCode::Success, body))
    }

    fn with_session(
        &mut self,
        kind: MessageKind,
        now: Instant,
        handle: impl FnOnce(&mut Self, &mut Session) -> Outcome,
    ) -> (ResultCode, ResponseBody) {
        let Some(mut session) = self.session.take() else {
            let reason =
                if self.session_expired { "session timed out" } else { "no active session" };
            return reject(ResultCode::ErrorInvalidRequest, reason);
        };
        if self.faults.reject_phase == Some(kind) {
            self.session = Some(session);
            return reject(ResultCode::ErrorInvalidRequest, &format!("{kind} refused"));
        }

        let outcome = handle(self, &mut session);
        if outcome.is_ok() {
            session.last_activity = now;
        }
        self.session = Some(session);
        match outcome {
            Ok(message) => {
                (ResultCode::Success, ResponseBody::Ack(Acknowledgment::accept(message)))
            },
            Err((code, message)) => reject(code, &message),
        }
    }

    fn prepare(&mut self, session: &mut Session, length: u32) -> Outcome {
        if length as usize > self.flash.len() {
            return Err((
                ResultCode::ErrorFlashOperation,
                format!("{length} bytes exceed {} byte flash region", self.flash.len()),
            ));
        }
        session.staged = Some(length);
        session.data = None;
        Ok(format!("ready for {length} bytes"))
    }

    fn data(session: &mut Session, packet: &DataPacket) -> Outcome {
        let Some(staged) = session.staged else {
            return Err((ResultCode::ErrorInvalidRequest, "no flash write staged".into()));
        };
        if !packet.crc_matches() {
            return Err((ResultCode::ErrorDataCorruption, "data CRC32 mismatch".into()));
        }
        let end = packet.offset as usize + packet.data.len();
        if end > staged as usize {
            return Err((
                ResultCode::ErrorInvalidRequest,
                format!("data ends at {end}, beyond {staged} staged bytes"),
            ));
        }
        session.data = Some(packet.data.clone());
        Ok(format!("received {} bytes", packet.data.len()))
    }

    fn verify(&mut self, session: &mut Session) -> Outcome {
        let (Some(staged), Some(data)) = (session.staged, session.data.take()) else {
            return Err((ResultCode::ErrorInvalidRequest, "nothing to program".into()));
        };
        if data.len() != staged as usize {
            return Err((
                ResultCode::ErrorFlashOperation,
                format!("received {} of {staged} bytes", data.len()),
            ));
        }
        let base = self.config.flash_base;
        if !self.write_flash(base, &data) {
            return Err((ResultCode::ErrorFlashOperation, "write outside flash".into()));
        }
        self.stats.flash_writes += 1;
        session.staged = None;
        Ok(format!("programmed and verified {staged} bytes"))
    }

    fn respond(&mut self, response: Response) {
        let frame = match response.to_frame() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(error = %err, "simulated response does not fit a frame");
                return;
            },
        };
        let noise = self.noise(self.faults.response_noise);
        self.output.extend(noise);
        self.output.extend(frame.to_bytes());
    }

    /// `len` random bytes, none of them a frame marker.
    fn noise(&self, len: usize) -> Vec<u8> {
        let mut noise = Vec::with_capacity(len);
        let mut chunk = [0u8; 32];
        while noise.len() < len {
            self.env.random_bytes(&mut chunk);
            noise.extend(chunk.iter().copied().filter(|b| *b != FRAME_START && *b != FRAME_END));
        }
        noise.truncate(len);
        noise
    }
}

fn reject(code: ResultCode, message: &str) -> (ResultCode, ResponseBody) {
    (code, ResponseBody::Ack(Acknowledgment::reject(message)))
}

/// Locks a shared device.
pub fn lock(device: &SharedDevice) -> MutexGuard<'_, SimDevice> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use bootoracle_proto::{FlashProgramRequest, HandshakeRequest};

    use super::*;

    fn send(device: &mut SimDevice, body: RequestBody, now: Instant) -> Response {
        let wire = Request::for_phase(body).to_frame().unwrap().to_bytes();
        device.receive(&wire, now);
        let out = device.take_output(usize::MAX);
        Response::decode(Frame::decode(&out).unwrap().payload()).unwrap()
    }

    fn handshake() -> RequestBody {
        RequestBody::Handshake(HandshakeRequest {
            capabilities: "flash_program".into(),
            max_packet_size: 256,
        })
    }

    #[test]
    fn full_session_programs_flash() {
        let env = SimEnv::new();
        let t0 = env.now();
        let mut device = SimDevice::new(DeviceConfig::default(), &env);

        assert!(send(&mut device, handshake(), t0).result.is_success());
        let prepare = RequestBody::FlashProgram(FlashProgramRequest::prepare(4));
        assert!(send(&mut device, prepare, t0).result.is_success());
        let data = RequestBody::Data(DataPacket::new(0, vec![1, 2, 3, 4]));
        assert!(send(&mut device, data, t0).result.is_success());
        let verify = RequestBody::FlashProgram(FlashProgramRequest::verify(4));
        assert!(send(&mut device, verify, t0).result.is_success());

        assert_eq!(&device.flash()[..5], &[1, 2, 3, 4, 0xFF]);
        assert_eq!(device.stats().flash_writes, 1);
    }

    #[test]
    fn expired_session_rejects_prepare() {
        let env = SimEnv::new();
        let t0 = env.now();
        let mut device = SimDevice::new(DeviceConfig::default(), &env);
        send(&mut device, handshake(), t0);

        let late = t0 + Duration::from_secs(35);
        let prepare = RequestBody::FlashProgram(FlashProgramRequest::prepare(4));
        let response = send(&mut device, prepare, late);
        assert_eq!(response.result, ResultCode::ErrorInvalidRequest);
        assert_eq!(device.stats().session_timeouts, 1);
    }

    #[test]
    fn late_first_handshake_exits_bootloader() {
        let env = SimEnv::new();
        let t0 = env.now();
        let mut device = SimDevice::new(DeviceConfig::default(), &env);

        let wire = Request::for_phase(handshake()).to_frame().unwrap().to_bytes();
        device.receive(&wire, t0 + Duration::from_secs(3));
        assert!(device.has_exited());
        assert_eq!(device.pending_output(), 0);

        device.reset(t0 + Duration::from_secs(4));
        assert!(send(&mut device, handshake(), t0 + Duration::from_secs(4)).result.is_success());
    }

    #[test]
    fn bad_crc_is_dropped_silently() {
        let env = SimEnv::new();
        let t0 = env.now();
        let mut device = SimDevice::new(DeviceConfig::default(), &env);
        let mut wire = Request::for_phase(handshake()).to_frame().unwrap().to_bytes().to_vec();
        let crc_high = wire.len() - 3;
        wire[crc_high] ^= 0xFF;

        device.receive(&wire, t0);
        assert_eq!(device.pending_output(), 0);
        assert_eq!(device.stats().crc_errors, 1);

        assert!(send(&mut device, handshake(), t0).result.is_success());
    }

    #[test]
    fn stalled_partial_frame_is_dropped() {
        let env = SimEnv::new();
        let t0 = env.now();
        let mut device = SimDevice::new(DeviceConfig::default(), &env);
        let wire = Request::for_phase(handshake()).to_frame().unwrap().to_bytes();

        device.receive(&wire[..3], t0);
        let later = t0 + Duration::from_secs(1);
        assert!(send(&mut device, handshake(), later).result.is_success());
        assert_eq!(device.stats().partial_frames_dropped, 1);
    }

    #[test]
    fn start_marker_mid_frame_restarts_decoding() {
        let env = SimEnv::new();
        let t0 = env.now();
        let mut device = SimDevice::new(DeviceConfig::default(), &env);
        let wire = Request::for_phase(handshake()).to_frame().unwrap().to_bytes();

        device.receive(&wire[..5], t0);
        assert!(send(&mut device, handshake(), t0).result.is_success());
        assert_eq!(device.stats().partial_frames_dropped, 1);
        assert_eq!(device.stats().framing_errors, 0);
    }

    #[test]
    fn response_noise_never_contains_markers() {
        let env = SimEnv::with_seed(7);
        let t0 = env.now();
        let mut device = SimDevice::new(DeviceConfig::default(), &env);
        device.set_faults(DeviceFaults { response_noise: 300, ..DeviceFaults::default() });

        let wire = Request::for_phase(handshake()).to_frame().unwrap().to_bytes();
        device.receive(&wire, t0);
        let out = device.take_output(usize::MAX);

        let (noise, frame) = out.split_at(300);
        assert!(noise.iter().all(|b| *b != FRAME_START && *b != FRAME_END));
        assert!(noise.iter().any(|b| *b != noise[0]));
        let response = Response::decode(Frame::decode(frame).unwrap().payload()).unwrap();
        assert!(response.result.is_success());
    }

    #[test]
    fn flash_access_is_bounds_checked() {
        let mut device = SimDevice::new(DeviceConfig::default(), &SimEnv::new());
        assert!(device.read_flash(0x0801_F800, 2048).is_some());
        assert!(device.read_flash(0x0801_F800, 2049).is_none());
        assert!(device.read_flash(0x0800_0000, 4).is_none());
        assert!(!device.write_flash(0x0801_FFFF, &[0, 0]));
    }
}
