//! Scenario builder API.
//!
//! Provides a declarative API for constructing scenario tests that enforce
//! the Oracle Pattern: a list of steps against one simulated bootloader,
//! then a mandatory oracle over the resulting [`World`].

use std::time::Duration;

use bootoracle_core::{
    ClientConfig, Environment, FaultInjector, FaultKind, Orchestrator, OrchestratorConfig,
    ProtocolClient, ScenarioCatalog,
};

use crate::{
    scenario::{
        OracleFn, World,
        world::{Outcome, ProbeLog},
    },
    sim_device::{DeviceConfig, DeviceFaults, SimDevice, lock},
    sim_env::SimEnv,
    sim_hardware::SimHardware,
    sim_transport::SimTransport,
};

/// One action in a scenario.
#[derive(Debug, Clone)]
pub enum Step {
    /// Full session with this payload
    Session(Vec<u8>),
    /// Single fault injection with the configured delay
    Fault(FaultKind),
    /// Fault injection followed by a full session with this payload
    Recovery(FaultKind, Vec<u8>),
    /// Named scenario or sequence from the catalog
    Run(String),
    /// Let virtual time pass without traffic
    Advance(Duration),
    /// Replace the device's misbehaviors
    DeviceFaults(DeviceFaults),
}

/// Scenario builder.
///
/// Configure the device, client and orchestrator, queue steps, then supply
/// an oracle to get a [`RunnableScenario`].
#[derive(Debug, Clone)]
pub struct Scenario {
    seed: u64,
    device: DeviceConfig,
    faults: DeviceFaults,
    client: ClientConfig,
    orchestrator: OrchestratorConfig,
    catalog: ScenarioCatalog,
    probe_healthy: bool,
    probe_fails_restore: bool,
    hardware_latency: Duration,
    flash_image: Option<Vec<u8>>,
    steps: Vec<Step>,
}

impl Scenario {
    /// Create a new scenario with default configuration.
    pub fn new() -> Self {
        Self {
            seed: 0,
            device: DeviceConfig::default(),
            faults: DeviceFaults::default(),
            client: ClientConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            catalog: ScenarioCatalog::default(),
            probe_healthy: true,
            probe_fails_restore: false,
            hardware_latency: Duration::ZERO,
            flash_image: None,
            steps: Vec::new(),
        }
    }

    /// Seed for the simulation RNG.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Configure the simulated bootloader.
    pub fn with_device(mut self, config: DeviceConfig) -> Self {
        self.device = config;
        self
    }

    /// Misbehaviors active from the first byte.
    pub fn with_device_faults(mut self, faults: DeviceFaults) -> Self {
        self.faults = faults;
        self
    }

    /// Configure the protocol client.
    pub fn with_client(mut self, config: ClientConfig) -> Self {
        self.client = config;
        self
    }

    /// Configure the orchestrator and fault delays.
    pub fn with_orchestrator(mut self, config: OrchestratorConfig) -> Self {
        self.orchestrator = config;
        self
    }

    /// Scenarios and sequences available to [`Step::Run`].
    pub fn with_catalog(mut self, catalog: ScenarioCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Flash contents written at the device's flash base before any step.
    pub fn with_flash_image(mut self, image: impl Into<Vec<u8>>) -> Self {
        self.flash_image = Some(image.into());
        self
    }

    /// Makes the debug probe fail its health check.
    pub fn with_unhealthy_probe(mut self) -> Self {
        self.probe_healthy = false;
        self
    }

    /// Makes every flash restore through the probe fail.
    pub fn with_failing_restore(mut self) -> Self {
        self.probe_fails_restore = true;
        self
    }

    /// Virtual time every hardware call takes.
    pub fn with_hardware_latency(mut self, latency: Duration) -> Self {
        self.hardware_latency = latency;
        self
    }

    /// Queue a step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Queue a full session with `payload`.
    pub fn session(self, payload: impl Into<Vec<u8>>) -> Self {
        self.step(Step::Session(payload.into()))
    }

    /// Queue a single fault injection.
    pub fn fault(self, kind: FaultKind) -> Self {
        self.step(Step::Fault(kind))
    }

    /// Queue a catalog run.
    pub fn run_named(self, name: impl Into<String>) -> Self {
        self.step(Step::Run(name.into()))
    }

    /// Set the oracle function and return a runnable scenario.
    ///
    /// The oracle is mandatory - you cannot run a scenario without
    /// verification.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

/// A scenario with an oracle function that can be executed.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Execute the scenario.
    ///
    /// Boots a fresh simulated device on a fresh virtual clock, runs every
    /// step in order whatever the previous step returned, snapshots the
    /// world and hands it to the oracle.
    ///
    /// # Errors
    ///
    /// The oracle's message if verification fails, or a setup error if the
    /// flash image does not fit the device.
    pub fn run(self) -> Result<(), String> {
        let world = self.execute()?;
        (self.oracle)(&world)
    }

    /// Execute the steps and return the world without verifying it.
    ///
    /// # Errors
    ///
    /// A setup error if the flash image does not fit the device.
    pub fn execute(&self) -> Result<World, String> {
        let scenario = &self.scenario;
        let env = SimEnv::with_seed(scenario.seed);

        let mut device = SimDevice::new(scenario.device.clone(), &env);
        if let Some(image) = &scenario.flash_image {
            if !device.write_flash(scenario.device.flash_base, image) {
                return Err(format!("flash image of {} bytes does not fit", image.len()));
            }
        }
        device.set_faults(scenario.faults.clone());
        let mut world = World::new(device.flash().to_vec());
        let device = device.shared();

        let transport = SimTransport::new(device.clone(), env.clone());
        let client = ProtocolClient::new(transport, env.clone(), scenario.client.clone());
        let mut hardware =
            SimHardware::new(device.clone(), env.clone()).with_latency(scenario.hardware_latency);
        if !scenario.probe_healthy {
            hardware = hardware.unhealthy();
        }
        if scenario.probe_fails_restore {
            hardware = hardware.failing_restore();
        }
        let mut orchestrator =
            Orchestrator::new(client, hardware, scenario.catalog.clone(), scenario.orchestrator);

        for step in &scenario.steps {
            tracing::debug!(?step, "scenario step");
            let outcome = match step {
                Step::Session(payload) => {
                    Some(Outcome::Session(orchestrator.client_mut().run_session(payload)))
                },
                Step::Fault(kind) => {
                    let fault = orchestrator.fault_config();
                    let mut injector = FaultInjector::new(orchestrator.client_mut(), fault);
                    let result = match kind {
                        FaultKind::SessionTimeout => {
                            injector.inject_session_timeout(fault.session_timeout_delay)
                        },
                        FaultKind::HandshakeTimeout => {
                            injector.inject_handshake_timeout(fault.handshake_timeout_delay)
                        },
                        FaultKind::CrcCorruption => injector.inject_crc_corruption(),
                        FaultKind::PartialFrame => {
                            injector.inject_partial_frame(fault.partial_frame_delay)
                        },
                    };
                    Some(Outcome::Fault { kind: *kind, result })
                },
                Step::Recovery(kind, payload) => {
                    let fault = orchestrator.fault_config();
                    let result = FaultInjector::new(orchestrator.client_mut(), fault)
                        .run_recovery_cycle(*kind, payload);
                    Some(Outcome::Recovery { kind: *kind, result })
                },
                Step::Run(name) => {
                    Some(Outcome::Run { name: name.clone(), report: orchestrator.run(name) })
                },
                Step::Advance(duration) => {
                    env.advance(*duration);
                    None
                },
                Step::DeviceFaults(faults) => {
                    lock(&device).set_faults(faults.clone());
                    None
                },
            };
            if let Some(outcome) = outcome {
                world.record(outcome);
            }
        }

        {
            let device = lock(&device);
            world.capture_device(
                device.stats().clone(),
                device.flash(),
                device.in_session(),
                device.has_exited(),
            );
        }
        let client = orchestrator.client();
        world.capture_client(
            client.state(),
            client.transmission_log(),
            client.transport().received(),
            env.elapsed(),
        );
        let probe = orchestrator.hardware();
        world.capture_probe(ProbeLog {
            backups: probe.backups().to_vec(),
            restores: probe.restores().to_vec(),
            resets: probe.resets(),
        });
        Ok(world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_requires_oracle() {
        // This should compile - oracle provided
        let _scenario = Scenario::new().oracle(Box::new(|_world| Ok(())));
    }

    #[test]
    fn empty_scenario_leaves_device_untouched() {
        let scenario = Scenario::new().oracle(Box::new(|world| {
            assert!(world.outcomes().is_empty());
            assert!(world.flash_unchanged());
            assert_eq!(world.device_stats().frames_received, 0);
            assert_eq!(world.elapsed(), Duration::ZERO);
            Ok(())
        }));

        scenario.run().expect("scenario should succeed");
    }

    #[test]
    fn advance_moves_virtual_time() {
        let world = Scenario::new()
            .step(Step::Advance(Duration::from_secs(40)))
            .oracle(Box::new(|_| Ok(())))
            .execute()
            .unwrap();

        assert_eq!(world.elapsed(), Duration::from_secs(40));
    }

    #[test]
    fn oversized_flash_image_is_a_setup_error() {
        let err = Scenario::new()
            .with_flash_image(vec![0u8; 4096])
            .oracle(Box::new(|_| Ok(())))
            .run()
            .unwrap_err();

        assert!(err.contains("does not fit"), "{err}");
    }
}
