//! Scenario catalog, payload generation, validation and orchestration.

pub mod definition;
pub mod orchestrator;
pub mod payload;
pub mod validation;

pub use definition::{
    ErrorType, InjectionPoint, PayloadPattern, ScenarioCatalog, ScenarioDefinition,
    SequenceDefinition, SequenceStep, ValidationLevel,
};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, RunReport, ScenarioResult, SequenceResult,
};
pub use payload::generate_payload;
pub use validation::{VALIDATION_PAYLOAD_SIZE, validate};
