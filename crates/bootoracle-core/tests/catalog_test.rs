//! Catalog loading through the public API.

use std::time::Duration;

use bootoracle_core::{
    OracleError, ScenarioCatalog, ScenarioDefinition, SequenceDefinition,
    scenario::{ErrorType, InjectionPoint, PayloadPattern, SequenceStep, ValidationLevel},
};
use proptest::prelude::*;

const CATALOG: &str = r#"{
    "scenarios": {
        "normal": { "test_payload_size": 128, "payload_pattern": "alternating" },
        "idle": {
            "error_type": "timeout",
            "injection_point": "after_handshake",
            "timeout_seconds": 40.0,
            "validation_level": "recovery_protocol"
        },
        "crc": { "error_type": "crc_corruption", "validation_level": "recovery_handshake" }
    },
    "sequences": {
        "smoke": {
            "description": "idle then clean",
            "sequence": ["normal", { "scenario": "idle", "description": "expire" }, "crc"]
        }
    }
}"#;

#[test]
fn json_matches_builder() {
    let parsed = ScenarioCatalog::from_json(CATALOG).unwrap();

    let mut smoke = SequenceDefinition::of(["normal", "idle", "crc"]);
    smoke.description = "idle then clean".into();
    smoke.sequence[1] =
        SequenceStep::Detailed { scenario: "idle".into(), description: Some("expire".into()) };
    let built = ScenarioCatalog::default()
        .with_scenario("normal", ScenarioDefinition::session(128, PayloadPattern::Alternating))
        .with_scenario(
            "idle",
            ScenarioDefinition::timeout(InjectionPoint::AfterHandshake)
                .with_timeout(Duration::from_secs(40))
                .with_validation(ValidationLevel::RecoveryProtocol),
        )
        .with_scenario(
            "crc",
            ScenarioDefinition::crc_corruption()
                .with_validation(ValidationLevel::RecoveryHandshake),
        )
        .with_sequence("smoke", smoke);

    assert_eq!(parsed, built);
}

#[test]
fn names_are_sorted() {
    let catalog = ScenarioCatalog::from_json(CATALOG).unwrap();

    assert_eq!(catalog.scenario_names().collect::<Vec<_>>(), ["crc", "idle", "normal"]);
    assert_eq!(catalog.sequence_names().collect::<Vec<_>>(), ["smoke"]);
}

#[test]
fn step_descriptions_default_to_execute() {
    let catalog = ScenarioCatalog::from_json(CATALOG).unwrap();
    let smoke = catalog.sequence("smoke").unwrap();

    let descriptions: Vec<_> = smoke.sequence.iter().map(SequenceStep::description).collect();
    assert_eq!(descriptions, ["Execute normal", "expire", "Execute crc"]);
}

#[test]
fn serialized_catalog_loads_back() {
    let catalog = ScenarioCatalog::from_json(CATALOG).unwrap();
    let json = serde_json::to_string(&catalog).unwrap();

    assert_eq!(ScenarioCatalog::from_json(&json).unwrap(), catalog);
}

#[test]
fn malformed_json_is_a_config_error() {
    let err = ScenarioCatalog::from_json("{ \"scenarios\": [").unwrap_err();

    assert!(matches!(err, OracleError::ScenarioConfig(_)));
    assert_eq!(err.code(), "SCENARIO_CONFIG_ERROR");
}

#[test]
fn unknown_error_type_is_rejected() {
    let json = r#"{ "scenarios": { "x": { "error_type": "brownout" } } }"#;
    let err = ScenarioCatalog::from_json(json).unwrap_err();

    assert!(err.to_string().contains("brownout"));
}

#[test]
fn prop_valid_timeouts_are_used_verbatim() {
    proptest!(|(secs in 0u64..120)| {
        let json = format!(
            r#"{{"scenarios":{{"t":{{"error_type":"timeout","timeout_seconds":{secs}.5}}}}}}"#
        );
        let catalog = ScenarioCatalog::from_json(&json).unwrap();
        let scenario = catalog.scenario("t").unwrap();

        prop_assert_eq!(scenario.error_type, ErrorType::Timeout);
        prop_assert_eq!(scenario.injected_delay(), Duration::from_millis(secs * 1000 + 500));
    });
}

#[test]
fn prop_negative_timeouts_are_rejected() {
    proptest!(|(secs in -1.0e6f64..-1.0e-3)| {
        let json = format!(r#"{{ "scenarios": {{ "t": {{ "timeout_seconds": {secs} }} }} }}"#);
        let err = ScenarioCatalog::from_json(&json).unwrap_err();

        prop_assert!(err.to_string().contains("scenario 't'"));
    });
}
