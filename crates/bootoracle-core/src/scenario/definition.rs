//! Scenario and sequence definitions, as loaded from a JSON catalog.
//!
//! ```json
//! {
//!   "scenarios": {
//!     "session_timeout": {
//!       "description": "idle past the session window",
//!       "error_type": "timeout",
//!       "injection_point": "after_handshake",
//!       "validation_level": "recovery_handshake"
//!     }
//!   },
//!   "sequences": {
//!     "smoke": { "sequence": ["normal", { "scenario": "session_timeout" }] }
//!   }
//! }
//! ```

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{OracleError, Result};

/// What a scenario does to the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Run a clean four-phase session
    #[default]
    None,
    /// Idle at the injection point
    Timeout,
    /// Send a handshake with a corrupted CRC
    CrcCorruption,
}

/// Where in the session a timeout is introduced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionPoint {
    /// Between handshake and prepare
    #[default]
    AfterHandshake,
    /// Before the first handshake
    BeforeHandshake,
    /// In the middle of a frame
    PartialFrame,
}

impl InjectionPoint {
    /// Delay used when a scenario sets no `timeout_seconds`
    #[must_use]
    pub const fn default_timeout(self) -> Duration {
        match self {
            Self::AfterHandshake => Duration::from_secs(35),
            Self::BeforeHandshake => Duration::from_secs(3),
            Self::PartialFrame => Duration::from_secs(2),
        }
    }
}

/// Test payload contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadPattern {
    /// `i % 256`
    #[default]
    Incremental,
    /// Pseudo-random bytes from `payload_seed`
    #[serde(alias = "random_seed_42")]
    SeededRandom,
    /// `0xAA, 0x55, ...`
    Alternating,
}

/// Check applied after a scenario's action succeeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    /// Transport still open
    #[default]
    Basic,
    /// One handshake succeeds
    RecoveryHandshake,
    /// Handshake and prepare succeed
    RecoveryProtocol,
    /// A full session succeeds
    CompleteProtocol,
}

impl ValidationLevel {
    /// Catalog name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::RecoveryHandshake => "recovery_handshake",
            Self::RecoveryProtocol => "recovery_protocol",
            Self::CompleteProtocol => "complete_protocol",
        }
    }
}

fn default_payload_size() -> usize {
    256
}

fn default_seed() -> u64 {
    42
}

/// One named scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Action to run
    #[serde(default)]
    pub error_type: ErrorType,
    /// Where a timeout is injected
    #[serde(default)]
    pub injection_point: InjectionPoint,
    /// Injected delay; defaults per injection point
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    /// Payload size for clean sessions
    #[serde(default = "default_payload_size")]
    pub test_payload_size: usize,
    /// Payload contents for clean sessions
    #[serde(default)]
    pub payload_pattern: PayloadPattern,
    /// Seed for [`PayloadPattern::SeededRandom`]
    #[serde(default = "default_seed")]
    pub payload_seed: u64,
    /// Post-condition check
    #[serde(default)]
    pub validation_level: ValidationLevel,
}

impl Default for ScenarioDefinition {
    fn default() -> Self {
        Self {
            description: String::new(),
            error_type: ErrorType::default(),
            injection_point: InjectionPoint::default(),
            timeout_seconds: None,
            test_payload_size: default_payload_size(),
            payload_pattern: PayloadPattern::default(),
            payload_seed: default_seed(),
            validation_level: ValidationLevel::default(),
        }
    }
}

impl ScenarioDefinition {
    /// Clean session scenario.
    #[must_use]
    pub fn session(size: usize, pattern: PayloadPattern) -> Self {
        Self { test_payload_size: size, payload_pattern: pattern, ..Self::default() }
    }

    /// Timeout scenario at `point`.
    #[must_use]
    pub fn timeout(point: InjectionPoint) -> Self {
        Self { error_type: ErrorType::Timeout, injection_point: point, ..Self::default() }
    }

    /// CRC corruption scenario.
    #[must_use]
    pub fn crc_corruption() -> Self {
        Self { error_type: ErrorType::CrcCorruption, ..Self::default() }
    }

    /// Sets the post-condition check.
    #[must_use]
    pub fn with_validation(mut self, level: ValidationLevel) -> Self {
        self.validation_level = level;
        self
    }

    /// Sets the injected delay.
    #[must_use]
    pub fn with_timeout(mut self, delay: Duration) -> Self {
        self.timeout_seconds = Some(delay.as_secs_f64());
        self
    }

    /// Injected delay, falling back to the injection point's default.
    #[must_use]
    pub fn injected_delay(&self) -> Duration {
        self.timeout_seconds
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_else(|| self.injection_point.default_timeout())
    }

    /// Whether running this scenario may write flash.
    #[must_use]
    pub fn programs_flash(&self) -> bool {
        self.error_type == ErrorType::None
            || self.validation_level == ValidationLevel::CompleteProtocol
    }

    fn check(&self, name: &str) -> Result<()> {
        if let Some(secs) = self.timeout_seconds {
            if Duration::try_from_secs_f64(secs).is_err() {
                return Err(OracleError::ScenarioConfig(format!(
                    "scenario '{name}': timeout_seconds must be a non-negative number of \
                     seconds that fits a duration, got {secs}"
                )));
            }
        }
        Ok(())
    }
}

/// One step of a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SequenceStep {
    /// Bare scenario name
    Name(String),
    /// Scenario name with a description
    Detailed {
        /// Scenario to run
        scenario: String,
        /// What the step is for
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl SequenceStep {
    /// Scenario this step runs
    #[must_use]
    pub fn scenario(&self) -> &str {
        match self {
            Self::Name(name) | Self::Detailed { scenario: name, .. } => name,
        }
    }

    /// Step description, defaulting to `Execute <scenario>`
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::Detailed { description: Some(description), .. } => description.clone(),
            _ => format!("Execute {}", self.scenario()),
        }
    }
}

impl From<&str> for SequenceStep {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

/// Ordered list of scenarios run fail-fast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceDefinition {
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Steps in order
    #[serde(alias = "scenarios")]
    pub sequence: Vec<SequenceStep>,
}

impl SequenceDefinition {
    /// Sequence of bare scenario names.
    pub fn of<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            description: String::new(),
            sequence: names.into_iter().map(|n| SequenceStep::from(n.as_ref())).collect(),
        }
    }
}

/// Named scenarios and sequences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioCatalog {
    /// Scenarios by name
    #[serde(default)]
    pub scenarios: BTreeMap<String, ScenarioDefinition>,
    /// Sequences by name
    #[serde(default)]
    pub sequences: BTreeMap<String, SequenceDefinition>,
}

impl ScenarioCatalog {
    /// Adds or replaces a scenario.
    #[must_use]
    pub fn with_scenario(mut self, name: impl Into<String>, scenario: ScenarioDefinition) -> Self {
        self.scenarios.insert(name.into(), scenario);
        self
    }

    /// Adds or replaces a sequence.
    #[must_use]
    pub fn with_sequence(mut self, name: impl Into<String>, sequence: SequenceDefinition) -> Self {
        self.sequences.insert(name.into(), sequence);
        self
    }

    /// Parses and checks a JSON catalog.
    ///
    /// # Errors
    ///
    /// `OracleError::ScenarioConfig` if the JSON is malformed, names an
    /// unknown enum value (such as a validation level), or carries an
    /// invalid timeout.
    pub fn from_json(json: &str) -> Result<Self> {
        let catalog: Self = serde_json::from_str(json)
            .map_err(|err| OracleError::ScenarioConfig(format!("invalid catalog: {err}")))?;
        for (name, scenario) in &catalog.scenarios {
            scenario.check(name)?;
        }
        Ok(catalog)
    }

    /// Looks up a scenario.
    #[must_use]
    pub fn scenario(&self, name: &str) -> Option<&ScenarioDefinition> {
        self.scenarios.get(name)
    }

    /// Looks up a sequence.
    #[must_use]
    pub fn sequence(&self, name: &str) -> Option<&SequenceDefinition> {
        self.sequences.get(name)
    }

    /// Scenario names, sorted
    pub fn scenario_names(&self) -> impl Iterator<Item = &str> {
        self.scenarios.keys().map(String::as_str)
    }

    /// Sequence names, sorted
    pub fn sequence_names(&self) -> impl Iterator<Item = &str> {
        self.sequences.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let catalog = ScenarioCatalog::from_json(r#"{"scenarios": {"plain": {}}}"#).unwrap();
        let plain = catalog.scenario("plain").unwrap();
        assert_eq!(plain, &ScenarioDefinition::default());
        assert_eq!(plain.test_payload_size, 256);
        assert_eq!(plain.payload_seed, 42);
        assert!(plain.programs_flash());
    }

    #[test]
    fn timeout_defaults_follow_injection_point() {
        assert_eq!(
            ScenarioDefinition::timeout(InjectionPoint::AfterHandshake).injected_delay(),
            Duration::from_secs(35)
        );
        assert_eq!(
            ScenarioDefinition::timeout(InjectionPoint::BeforeHandshake).injected_delay(),
            Duration::from_secs(3)
        );
        assert_eq!(
            ScenarioDefinition::timeout(InjectionPoint::PartialFrame)
                .with_timeout(Duration::from_millis(1500))
                .injected_delay(),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn unknown_validation_level_is_rejected() {
        let err = ScenarioCatalog::from_json(
            r#"{"scenarios": {"x": {"validation_level": "paranoid"}}}"#,
        )
        .unwrap_err();
        assert_eq!(err.code(), "SCENARIO_CONFIG_ERROR");
    }

    #[test]
    fn negative_timeout_is_rejected() {
        let err = ScenarioCatalog::from_json(
            r#"{"scenarios": {"x": {"error_type": "timeout", "timeout_seconds": -1}}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("timeout_seconds"));
    }

    #[test]
    fn timeout_beyond_duration_range_is_rejected() {
        let err = ScenarioCatalog::from_json(
            r#"{"scenarios": {"x": {"error_type": "timeout", "timeout_seconds": 1e30}}}"#,
        )
        .unwrap_err();
        assert_eq!(err.code(), "SCENARIO_CONFIG_ERROR");
        assert!(err.to_string().contains("fits a duration"), "{err}");
    }

    #[test]
    fn random_pattern_accepts_legacy_name() {
        let catalog = ScenarioCatalog::from_json(
            r#"{"scenarios": {"a": {"payload_pattern": "random_seed_42"},
                              "b": {"payload_pattern": "seeded-random"}}}"#,
        )
        .unwrap();
        assert_eq!(catalog.scenarios["a"].payload_pattern, PayloadPattern::SeededRandom);
        assert_eq!(catalog.scenarios["b"].payload_pattern, PayloadPattern::SeededRandom);
    }

    #[test]
    fn sequence_steps_accept_both_shapes() {
        let catalog = ScenarioCatalog::from_json(
            r#"{"sequences": {"s": {"scenarios": ["a", {"scenario": "b", "description": "B"}]}}}"#,
        )
        .unwrap();
        let steps = &catalog.sequence("s").unwrap().sequence;
        assert_eq!(steps[0].scenario(), "a");
        assert_eq!(steps[0].description(), "Execute a");
        assert_eq!(steps[1].scenario(), "b");
        assert_eq!(steps[1].description(), "B");
    }

    #[test]
    fn fault_scenarios_without_complete_validation_leave_flash_alone() {
        assert!(!ScenarioDefinition::crc_corruption().programs_flash());
        assert!(
            ScenarioDefinition::crc_corruption()
                .with_validation(ValidationLevel::CompleteProtocol)
                .programs_flash()
        );
    }
}
