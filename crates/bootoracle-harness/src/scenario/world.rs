//! World state for scenario execution.
//!
//! The World is a snapshot taken after every step has run: what each step
//! returned, what the device saw, what the debug probe did and how much
//! virtual time passed. Oracles only ever see this snapshot.

use std::time::Duration;

use bootoracle_core::{
    ClientState, FaultKind, OracleError, ProtocolResult, RunReport, TransmissionRecord,
};
use bytes::Bytes;

use crate::sim_device::DeviceStats;

/// What one scenario step produced.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A full four-phase session
    Session(ProtocolResult),
    /// A single fault injection
    Fault {
        /// Injected fault
        kind: FaultKind,
        /// Injector verdict
        result: ProtocolResult,
    },
    /// A fault followed by a full session
    Recovery {
        /// Injected fault
        kind: FaultKind,
        /// Combined verdict
        result: ProtocolResult,
    },
    /// A named scenario or sequence run through the orchestrator
    Run {
        /// Name that was run
        name: String,
        /// Report, or the configuration error that prevented the run
        report: Result<RunReport, OracleError>,
    },
}

impl Outcome {
    /// Whether the step passed.
    pub fn success(&self) -> bool {
        match self {
            Self::Session(result)
            | Self::Fault { result, .. }
            | Self::Recovery { result, .. } => result.success,
            Self::Run { report, .. } => report.as_ref().is_ok_and(RunReport::success),
        }
    }

    /// Protocol result of a session, fault or recovery step.
    pub fn result(&self) -> Option<&ProtocolResult> {
        match self {
            Self::Session(result)
            | Self::Fault { result, .. }
            | Self::Recovery { result, .. } => Some(result),
            Self::Run { .. } => None,
        }
    }

    /// Orchestrator report of a run step.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Self::Run { report: Ok(report), .. } => Some(report),
            _ => None,
        }
    }

    /// Short label for oracle messages.
    pub fn label(&self) -> String {
        match self {
            Self::Session(_) => "session".to_string(),
            Self::Fault { kind, .. } => format!("fault {}", kind.as_str()),
            Self::Recovery { kind, .. } => format!("recovery from {}", kind.as_str()),
            Self::Run { name, .. } => format!("run {name}"),
        }
    }
}

/// Probe activity seen by the simulated hardware.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeLog {
    /// `(address, length)` of every backup
    pub backups: Vec<(u32, usize)>,
    /// `(address, contents)` of every restore
    pub restores: Vec<(u32, Bytes)>,
    /// Number of target resets
    pub resets: usize,
}

/// Snapshot of a finished scenario.
#[derive(Debug, Clone)]
pub struct World {
    outcomes: Vec<Outcome>,
    device_stats: DeviceStats,
    flash: Vec<u8>,
    initial_flash: Vec<u8>,
    device_in_session: bool,
    device_exited: bool,
    probe: ProbeLog,
    client_state: ClientState,
    transmissions: Vec<TransmissionRecord>,
    received: Vec<u8>,
    elapsed: Duration,
}

impl World {
    pub(crate) fn new(initial_flash: Vec<u8>) -> Self {
        Self {
            outcomes: Vec::new(),
            device_stats: DeviceStats::default(),
            flash: initial_flash.clone(),
            initial_flash,
            device_in_session: false,
            device_exited: false,
            probe: ProbeLog::default(),
            client_state: ClientState::Disconnected,
            transmissions: Vec::new(),
            received: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn record(&mut self, outcome: Outcome) {
        self.outcomes.push(outcome);
    }

    pub(crate) fn capture_device(
        &mut self,
        stats: DeviceStats,
        flash: &[u8],
        in_session: bool,
        exited: bool,
    ) {
        self.device_stats = stats;
        self.flash = flash.to_vec();
        self.device_in_session = in_session;
        self.device_exited = exited;
    }

    pub(crate) fn capture_client(
        &mut self,
        state: ClientState,
        transmissions: &[TransmissionRecord],
        received: &[u8],
        elapsed: Duration,
    ) {
        self.client_state = state;
        self.transmissions = transmissions.to_vec();
        self.received = received.to_vec();
        self.elapsed = elapsed;
    }

    pub(crate) fn capture_probe(&mut self, probe: ProbeLog) {
        self.probe = probe;
    }

    /// Every step outcome, in order
    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    /// Outcome of the final step
    pub fn last(&self) -> Option<&Outcome> {
        self.outcomes.last()
    }

    /// Device-side counters
    pub fn device_stats(&self) -> &DeviceStats {
        &self.device_stats
    }

    /// Device flash at the end of the scenario
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// Device flash before the first step
    pub fn initial_flash(&self) -> &[u8] {
        &self.initial_flash
    }

    /// Whether the device still holds an open session
    pub fn device_in_session(&self) -> bool {
        self.device_in_session
    }

    /// Whether the bootloader jumped to the application
    pub fn device_exited(&self) -> bool {
        self.device_exited
    }

    /// Debug probe activity
    pub fn probe(&self) -> &ProbeLog {
        &self.probe
    }

    /// Client state after the last step
    pub fn client_state(&self) -> ClientState {
        self.client_state
    }

    /// Transmission log of the client's most recent session
    pub fn transmissions(&self) -> &[TransmissionRecord] {
        &self.transmissions
    }

    /// Every byte the client read from the device, noise included
    pub fn received(&self) -> &[u8] {
        &self.received
    }

    /// Virtual time consumed by the scenario
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// True if every step passed.
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(Outcome::success)
    }

    /// True if the flash ended up exactly as it started.
    pub fn flash_unchanged(&self) -> bool {
        self.flash == self.initial_flash
    }
}
