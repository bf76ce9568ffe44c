//! Catalog runs through the orchestrator: fail-fast sequences, flash
//! backup and restore, and target resets.

use std::time::Duration;

use bootoracle_core::{
    OracleError, OrchestratorConfig, RunReport, ScenarioCatalog, ScenarioDefinition,
    SequenceDefinition,
    scenario::{InjectionPoint, PayloadPattern, ValidationLevel},
};
use bootoracle_harness::scenario::{Outcome, Scenario, World, oracle};

const BACKUP_ADDRESS: u32 = 0x0801_F800;

fn catalog() -> ScenarioCatalog {
    ScenarioCatalog::default()
        .with_scenario(
            "clean",
            ScenarioDefinition::session(256, PayloadPattern::Incremental)
                .with_validation(ValidationLevel::CompleteProtocol),
        )
        .with_scenario(
            "crc",
            ScenarioDefinition::crc_corruption()
                .with_validation(ValidationLevel::RecoveryHandshake),
        )
        .with_scenario(
            "idle",
            ScenarioDefinition::timeout(InjectionPoint::AfterHandshake)
                .with_validation(ValidationLevel::RecoveryProtocol),
        )
        .with_scenario(
            "late_handshake",
            ScenarioDefinition::timeout(InjectionPoint::BeforeHandshake)
                .with_validation(ValidationLevel::RecoveryHandshake),
        )
        // 4 KiB does not fit the 2 KiB simulated flash region
        .with_scenario("oversized", ScenarioDefinition::session(4096, PayloadPattern::Alternating))
        .with_sequence("healthy", SequenceDefinition::of(["clean", "crc", "idle"]))
        .with_sequence("stops_early", SequenceDefinition::of(["clean", "oversized", "crc"]))
        .with_sequence("dangling", SequenceDefinition::of(["clean", "not_defined"]))
        .with_sequence("empty", SequenceDefinition::default())
}

fn report(world: &World) -> &RunReport {
    match world.last() {
        Some(outcome) => outcome.report().unwrap_or_else(|| panic!("no report: {outcome:?}")),
        None => panic!("no steps ran"),
    }
}

#[test]
fn healthy_sequence_passes_every_step() {
    let result = Scenario::new()
        .with_catalog(catalog())
        .run_named("healthy")
        .oracle(oracle::all_of(vec![
            oracle::all_succeeded(),
            oracle::flash_restored(),
            Box::new(|world: &World| {
                let RunReport::Sequence(sequence) = report(world) else {
                    panic!("expected a sequence report");
                };
                let names: Vec<_> =
                    sequence.scenario_results.iter().map(|r| r.name.as_str()).collect();
                assert_eq!(names, ["clean", "crc", "idle"]);
                assert_eq!(sequence.failed_at_scenario, None);
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn sequence_stops_at_first_failure() {
    let result = Scenario::new()
        .with_catalog(catalog())
        .run_named("stops_early")
        .oracle(Box::new(|world| {
            let RunReport::Sequence(sequence) = report(world) else {
                panic!("expected a sequence report");
            };
            assert!(!sequence.success);
            assert_eq!(sequence.failed_at_scenario.as_deref(), Some("oversized"));
            assert_eq!(sequence.scenario_results.len(), 2);
            assert!(sequence.scenario_results[0].success);
            assert!(!sequence.scenario_results[1].success);
            // "crc" never ran, so the device saw no corrupted frame
            assert_eq!(world.device_stats().crc_errors, 0);
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn missing_step_fails_the_sequence() {
    let result = Scenario::new()
        .with_catalog(catalog())
        .run_named("dangling")
        .oracle(Box::new(|world| {
            let RunReport::Sequence(sequence) = report(world) else {
                panic!("expected a sequence report");
            };
            assert_eq!(sequence.failed_at_scenario.as_deref(), Some("not_defined"));
            let missing = &sequence.scenario_results[1];
            assert!(!missing.success);
            assert_eq!(missing.error_details.as_deref(), Some("missing scenario configuration"));
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn unknown_and_empty_names_are_configuration_errors() {
    let result = Scenario::new()
        .with_catalog(catalog())
        .run_named("no_such_thing")
        .run_named("empty")
        .oracle(Box::new(|world| {
            for outcome in world.outcomes() {
                assert!(
                    matches!(
                        outcome,
                        Outcome::Run { report: Err(OracleError::ScenarioConfig(_)), .. }
                    ),
                    "{outcome:?}"
                );
            }
            assert_eq!(world.device_stats().frames_received, 0);
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn flashing_scenario_restores_backup() {
    let image: Vec<u8> = (0..2048u32).map(|i| (i * 7 % 251) as u8).collect();

    let result = Scenario::new()
        .with_catalog(catalog())
        .with_flash_image(image)
        .run_named("clean")
        .oracle(oracle::all_of(vec![
            oracle::all_succeeded(),
            oracle::flash_restored(),
            Box::new(|world: &World| {
                // session and complete-protocol validation both programmed flash
                assert_eq!(world.device_stats().flash_writes, 2);
                assert_eq!(world.probe().backups, [(BACKUP_ADDRESS, 2048)]);
                assert_eq!(world.probe().restores.len(), 1);
                assert_eq!(world.probe().restores[0].1.as_ref(), world.initial_flash());
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn non_flashing_scenario_skips_backup() {
    let result = Scenario::new()
        .with_catalog(catalog())
        .run_named("crc")
        .oracle(oracle::all_of(vec![
            oracle::all_succeeded(),
            Box::new(|world: &World| {
                assert!(world.probe().backups.is_empty());
                assert!(world.probe().restores.is_empty());
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn failed_restore_fails_the_scenario() {
    let result = Scenario::new()
        .with_catalog(catalog())
        .with_failing_restore()
        .run_named("clean")
        .oracle(Box::new(|world| {
            let RunReport::Scenario(scenario) = report(world) else {
                panic!("expected a scenario report");
            };
            assert!(!scenario.success);
            assert!(scenario.action.success);
            assert_eq!(scenario.error_details.as_deref(), Some("HARDWARE_ERROR"));
            assert!(!world.flash_unchanged());
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn unhealthy_probe_prevents_the_run() {
    let result = Scenario::new()
        .with_catalog(catalog())
        .with_unhealthy_probe()
        .run_named("clean")
        .oracle(Box::new(|world| {
            let RunReport::Scenario(scenario) = report(world) else {
                panic!("expected a scenario report");
            };
            assert!(!scenario.success);
            assert_eq!(scenario.error_details.as_deref(), Some("HARDWARE_ERROR"));
            assert!(scenario.validation.is_none());
            assert_eq!(world.device_stats().frames_received, 0);
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn refused_scenarios_report_time_spent_on_hardware() {
    let result = Scenario::new()
        .with_catalog(catalog())
        .with_unhealthy_probe()
        .with_hardware_latency(Duration::from_millis(250))
        .run_named("clean")
        .oracle(Box::new(|world| {
            let RunReport::Scenario(scenario) = report(world) else {
                panic!("expected a scenario report");
            };
            assert!(!scenario.success);
            assert_eq!(scenario.execution_time, Duration::from_millis(250));
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn failed_backup_reports_time_spent() {
    // Outside the simulated flash region
    let config = OrchestratorConfig { backup_address: 0x0800_0000, ..Default::default() };

    let result = Scenario::new()
        .with_catalog(catalog())
        .with_orchestrator(config)
        .with_hardware_latency(Duration::from_millis(250))
        .run_named("clean")
        .oracle(Box::new(|world| {
            let RunReport::Scenario(scenario) = report(world) else {
                panic!("expected a scenario report");
            };
            assert!(!scenario.success);
            assert!(scenario.message.starts_with("flash backup failed"), "{}", scenario.message);
            assert_eq!(scenario.error_details.as_deref(), Some("HARDWARE_ERROR"));
            // health check, then the backup attempt
            assert_eq!(scenario.execution_time, Duration::from_millis(500));
            assert_eq!(world.device_stats().frames_received, 0);
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn missed_handshake_window_triggers_reset() {
    let config =
        OrchestratorConfig { reset_settle: Duration::from_millis(500), ..Default::default() };

    let result = Scenario::new()
        .with_catalog(catalog())
        .with_orchestrator(config)
        .run_named("late_handshake")
        .oracle(oracle::all_of(vec![
            oracle::all_succeeded(),
            Box::new(|world: &World| {
                let RunReport::Scenario(scenario) = report(world) else {
                    panic!("expected a scenario report");
                };
                assert_eq!(scenario.action.data_bool("handshake_accepted"), Some(false));
                assert!(scenario.validation.as_ref().is_some_and(|v| v.success));
                assert_eq!(world.probe().resets, 1);
                assert!(!world.device_exited());
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn failed_action_skips_validation() {
    let result = Scenario::new()
        .with_catalog(catalog())
        .run_named("oversized")
        .oracle(Box::new(|world| {
            let RunReport::Scenario(scenario) = report(world) else {
                panic!("expected a scenario report");
            };
            assert!(!scenario.action.success);
            assert!(scenario.validation.is_none());
            assert!(scenario.message.starts_with("scenario failed"));
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn reports_serialize_with_seconds() {
    let world = Scenario::new()
        .with_catalog(catalog())
        .run_named("crc")
        .oracle(Box::new(|_| Ok(())))
        .execute()
        .unwrap();

    let json = serde_json::to_value(report(&world)).unwrap();
    assert_eq!(json["name"], "crc");
    assert_eq!(json["success"], true);
    assert!(json["execution_time"].is_f64());
    assert_eq!(json["validation"]["data"]["validation_level"], "recovery_handshake");
}
