//! Runs named scenarios and fail-fast sequences.
//!
//! The orchestrator owns the client and the hardware collaborator for the
//! whole run. Scenarios execute one at a time:
//!
//! 1. hardware health check
//! 2. flash backup, when the scenario may program flash
//! 3. the scenario action (clean session or fault injection)
//! 4. validation, only if the action succeeded
//! 5. flash restore, on every path
//!
//! A sequence stops at the first failed scenario and reports its name.

use std::time::Duration;

use serde::Serialize;

use super::{
    definition::{ErrorType, InjectionPoint, ScenarioCatalog, ScenarioDefinition},
    payload::generate_payload,
    validation::validate,
};
use crate::{
    client::ProtocolClient,
    env::Environment,
    error::{OracleError, Result},
    fault::{FaultConfig, FaultInjector},
    hardware::{BackupGuard, HardwareControl},
    result::{ProtocolResult, serialize_secs},
    transport::Transport,
};

/// Orchestrator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Wait after resetting the target
    pub reset_settle: Duration,
    /// Start of the flash region backed up around flashing scenarios
    pub backup_address: u32,
    /// Size of that region
    pub backup_length: usize,
    /// Fault injection delays not set by the scenario
    pub fault: FaultConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            reset_settle: Duration::from_secs(2),
            backup_address: 0x0801_F800,
            backup_length: 2048,
            fault: FaultConfig::default(),
        }
    }
}

/// Outcome of one scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioResult {
    /// Scenario name
    pub name: String,
    /// Action and validation both passed
    pub success: bool,
    /// Summary
    pub message: String,
    /// Wall time, in seconds when serialized
    #[serde(serialize_with = "serialize_secs")]
    pub execution_time: Duration,
    /// Failure code or reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    /// Result of the scenario action
    pub action: ProtocolResult,
    /// Result of the validation, if it ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ProtocolResult>,
}

impl ScenarioResult {
    fn not_run(
        name: &str,
        message: String,
        details: &str,
        action: ProtocolResult,
        execution_time: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            message,
            execution_time,
            error_details: Some(details.to_string()),
            action,
            validation: None,
        }
    }
}

/// Outcome of one sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceResult {
    /// Sequence name
    pub name: String,
    /// Every step passed
    pub success: bool,
    /// Summary
    pub message: String,
    /// Wall time, in seconds when serialized
    #[serde(serialize_with = "serialize_secs")]
    pub execution_time: Duration,
    /// Results of the steps that ran, in order
    pub scenario_results: Vec<ScenarioResult>,
    /// Scenario the sequence stopped at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at_scenario: Option<String>,
}

/// Either kind of run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RunReport {
    /// Single scenario
    Scenario(ScenarioResult),
    /// Sequence of scenarios
    Sequence(SequenceResult),
}

impl RunReport {
    /// `"scenario"` or `"sequence"`
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Scenario(_) => "scenario",
            Self::Sequence(_) => "sequence",
        }
    }

    /// Whether the run passed
    #[must_use]
    pub fn success(&self) -> bool {
        match self {
            Self::Scenario(result) => result.success,
            Self::Sequence(result) => result.success,
        }
    }

    /// Name of what ran
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Scenario(result) => &result.name,
            Self::Sequence(result) => &result.name,
        }
    }

    /// Summary
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Scenario(result) => &result.message,
            Self::Sequence(result) => &result.message,
        }
    }
}

/// Scenario runner over one client and one hardware collaborator.
pub struct Orchestrator<T: Transport, E: Environment, H: HardwareControl> {
    client: ProtocolClient<T, E>,
    hardware: H,
    catalog: ScenarioCatalog,
    config: OrchestratorConfig,
}

impl<T: Transport, E: Environment, H: HardwareControl> Orchestrator<T, E, H> {
    /// Creates an orchestrator.
    pub fn new(
        client: ProtocolClient<T, E>,
        hardware: H,
        catalog: ScenarioCatalog,
        config: OrchestratorConfig,
    ) -> Self {
        Self { client, hardware, catalog, config }
    }

    /// The catalog runs are looked up in
    pub fn catalog(&self) -> &ScenarioCatalog {
        &self.catalog
    }

    /// The client
    pub fn client(&self) -> &ProtocolClient<T, E> {
        &self.client
    }

    /// The client, for driving it between runs
    pub fn client_mut(&mut self) -> &mut ProtocolClient<T, E> {
        &mut self.client
    }

    /// The hardware collaborator
    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    /// Fault delays used for injected faults
    pub fn fault_config(&self) -> FaultConfig {
        self.config.fault
    }

    /// Runs `name` as a scenario if one exists, else as a sequence.
    ///
    /// # Errors
    ///
    /// `OracleError::ScenarioConfig` if neither exists.
    pub fn run(&mut self, name: &str) -> Result<RunReport> {
        if self.catalog.scenario(name).is_some() {
            self.run_scenario(name).map(RunReport::Scenario)
        } else if self.catalog.sequence(name).is_some() {
            self.run_sequence(name).map(RunReport::Sequence)
        } else {
            Err(OracleError::ScenarioConfig(format!("no scenario or sequence named '{name}'")))
        }
    }

    /// Runs one scenario.
    ///
    /// # Errors
    ///
    /// `OracleError::ScenarioConfig` if the scenario is unknown. Scenario
    /// failures are reported in the result, not as errors.
    pub fn run_scenario(&mut self, name: &str) -> Result<ScenarioResult> {
        let definition = self
            .catalog
            .scenario(name)
            .cloned()
            .ok_or_else(|| OracleError::ScenarioConfig(format!("unknown scenario '{name}'")))?;
        Ok(self.execute(name, &definition))
    }

    /// Runs a sequence, stopping at the first failed scenario.
    ///
    /// # Errors
    ///
    /// `OracleError::ScenarioConfig` if the sequence is unknown or empty.
    pub fn run_sequence(&mut self, name: &str) -> Result<SequenceResult> {
        let sequence = self
            .catalog
            .sequence(name)
            .cloned()
            .ok_or_else(|| OracleError::ScenarioConfig(format!("unknown sequence '{name}'")))?;
        if sequence.sequence.is_empty() {
            return Err(OracleError::ScenarioConfig(format!("sequence '{name}' has no steps")));
        }

        let started = self.client.env().now();
        tracing::info!(sequence = name, steps = sequence.sequence.len(), "running sequence");

        let mut scenario_results = Vec::with_capacity(sequence.sequence.len());
        let mut failed_at_scenario = None;
        for step in &sequence.sequence {
            let scenario = step.scenario();
            tracing::info!(sequence = name, step = %step.description(), "sequence step");
            let result = match self.catalog.scenario(scenario).cloned() {
                Some(definition) => self.execute(scenario, &definition),
                None => ScenarioResult::not_run(
                    scenario,
                    format!("scenario '{scenario}' not found"),
                    "missing scenario configuration",
                    ProtocolResult::failed("not run", "SCENARIO_CONFIG_ERROR"),
                    Duration::ZERO,
                ),
            };
            let passed = result.success;
            scenario_results.push(result);
            if !passed {
                failed_at_scenario = Some(scenario.to_string());
                break;
            }
        }

        let execution_time = self.client.env().elapsed_since(started);
        let (success, message) = match &failed_at_scenario {
            Some(scenario) => {
                tracing::error!(sequence = name, scenario = %scenario, "sequence failed");
                (false, format!("sequence failed at scenario '{scenario}'"))
            },
            None => {
                tracing::info!(sequence = name, ?execution_time, "sequence passed");
                (true, format!("all {} scenarios passed", scenario_results.len()))
            },
        };
        Ok(SequenceResult {
            name: name.to_string(),
            success,
            message,
            execution_time,
            scenario_results,
            failed_at_scenario,
        })
    }

    fn execute(&mut self, name: &str, definition: &ScenarioDefinition) -> ScenarioResult {
        let started = self.client.env().now();
        tracing::info!(
            scenario = name,
            error_type = ?definition.error_type,
            validation = definition.validation_level.as_str(),
            "running scenario"
        );

        if !self.hardware.health_check() {
            return ScenarioResult::not_run(
                name,
                "hardware health check failed".to_string(),
                "HARDWARE_ERROR",
                ProtocolResult::failed("not run", "HARDWARE_ERROR"),
                self.client.env().elapsed_since(started),
            );
        }

        let (action, validation, restore) = if definition.programs_flash() {
            let guard = BackupGuard::acquire(
                &mut self.hardware,
                self.config.backup_address,
                self.config.backup_length,
            );
            match guard {
                Ok(mut guard) => {
                    let (action, validation) =
                        Self::perform(&mut self.client, guard.hardware(), &self.config, definition);
                    (action, validation, guard.restore())
                },
                Err(err) => {
                    return ScenarioResult::not_run(
                        name,
                        format!("flash backup failed: {err}"),
                        "HARDWARE_ERROR",
                        ProtocolResult::failed("not run", "HARDWARE_ERROR"),
                        self.client.env().elapsed_since(started),
                    );
                },
            }
        } else {
            let (action, validation) =
                Self::perform(&mut self.client, &mut self.hardware, &self.config, definition);
            (action, validation, Ok(()))
        };

        let execution_time = self.client.env().elapsed_since(started);
        let (success, message, error_details) = match (&validation, restore) {
            _ if !action.success => (
                false,
                format!("scenario failed: {}", action.message),
                action.error_code.clone(),
            ),
            (Some(check), _) if !check.success => (
                false,
                format!("validation failed: {}", check.message),
                check.error_code.clone().or_else(|| Some("post-scenario validation failed".into())),
            ),
            (_, Err(err)) => {
                (false, format!("flash restore failed: {err}"), Some("HARDWARE_ERROR".into()))
            },
            _ => (true, format!("scenario successful: {}", action.message), None),
        };

        if success {
            tracing::info!(scenario = name, ?execution_time, "scenario passed");
        } else {
            tracing::warn!(scenario = name, %message, "scenario failed");
        }
        ScenarioResult {
            name: name.to_string(),
            success,
            message,
            execution_time,
            error_details,
            action,
            validation,
        }
    }

    /// Runs the action, then validation if the action passed.
    fn perform<Hw: HardwareControl + ?Sized>(
        client: &mut ProtocolClient<T, E>,
        hardware: &mut Hw,
        config: &OrchestratorConfig,
        definition: &ScenarioDefinition,
    ) -> (ProtocolResult, Option<ProtocolResult>) {
        let action = Self::action(client, hardware, config, definition);
        if !action.success {
            return (action, None);
        }
        let validation = validate(client, definition.validation_level);
        (action, Some(validation))
    }

    fn action<Hw: HardwareControl + ?Sized>(
        client: &mut ProtocolClient<T, E>,
        hardware: &mut Hw,
        config: &OrchestratorConfig,
        definition: &ScenarioDefinition,
    ) -> ProtocolResult {
        match definition.error_type {
            ErrorType::None => {
                let payload = generate_payload(
                    definition.payload_pattern,
                    definition.test_payload_size,
                    definition.payload_seed,
                );
                client.run_session(&payload)
            },
            ErrorType::CrcCorruption => {
                FaultInjector::new(client, config.fault).inject_crc_corruption()
            },
            ErrorType::Timeout => {
                let delay = definition.injected_delay();
                let mut injector = FaultInjector::new(client, config.fault);
                match definition.injection_point {
                    InjectionPoint::AfterHandshake => injector.inject_session_timeout(delay),
                    InjectionPoint::PartialFrame => injector.inject_partial_frame(delay),
                    InjectionPoint::BeforeHandshake => {
                        let result = injector.inject_handshake_timeout(delay);
                        if result.data_bool("handshake_accepted") == Some(false) {
                            if let Err(err) = Self::reset_target(client, hardware, config) {
                                return ProtocolResult::from_error("target reset", &err);
                            }
                        }
                        result
                    },
                }
            },
        }
    }

    /// Resets a device that left the bootloader after its handshake window.
    fn reset_target<Hw: HardwareControl + ?Sized>(
        client: &ProtocolClient<T, E>,
        hardware: &mut Hw,
        config: &OrchestratorConfig,
    ) -> Result<()> {
        tracing::info!("resetting target after handshake window expired");
        hardware.reset_and_run()?;
        client.env().sleep(config.reset_settle)?;
        Ok(())
    }
}

impl<T: Transport, E: Environment, H: HardwareControl> std::fmt::Debug for Orchestrator<T, E, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("client", &self.client)
            .field("catalog", &self.catalog)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
