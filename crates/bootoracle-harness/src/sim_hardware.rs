//! In-memory hardware collaborator backed by a simulated device.

use std::time::Duration;

use bootoracle_core::{
    env::Environment,
    hardware::{HardwareControl, HardwareError},
};
use bytes::Bytes;

use crate::{
    sim_device::{SharedDevice, lock},
    sim_env::SimEnv,
};

/// Debug probe for a [`SimDevice`](crate::SimDevice), recording every call.
#[derive(Debug)]
pub struct SimHardware {
    device: SharedDevice,
    env: SimEnv,
    healthy: bool,
    fail_restore: bool,
    latency: Duration,
    backups: Vec<(u32, usize)>,
    restores: Vec<(u32, Bytes)>,
    resets: usize,
}

impl SimHardware {
    /// Probe attached to `device`.
    pub fn new(device: SharedDevice, env: SimEnv) -> Self {
        Self {
            device,
            env,
            healthy: true,
            fail_restore: false,
            latency: Duration::ZERO,
            backups: Vec::new(),
            restores: Vec::new(),
            resets: 0,
        }
    }

    /// Makes health checks fail.
    #[must_use]
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Makes every restore fail.
    #[must_use]
    pub fn failing_restore(mut self) -> Self {
        self.fail_restore = true;
        self
    }

    /// Virtual time each hardware call takes.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// `(address, length)` of every backup
    pub fn backups(&self) -> &[(u32, usize)] {
        &self.backups
    }

    /// `(address, contents)` of every successful restore
    pub fn restores(&self) -> &[(u32, Bytes)] {
        &self.restores
    }

    /// Number of resets
    pub fn resets(&self) -> usize {
        self.resets
    }
}

impl HardwareControl for SimHardware {
    fn reset_and_run(&mut self) -> Result<(), HardwareError> {
        self.env.advance(self.latency);
        if !self.healthy {
            return Err(HardwareError::Reset("probe not connected".into()));
        }
        self.resets += 1;
        lock(&self.device).reset(self.env.now());
        Ok(())
    }

    fn backup(&mut self, address: u32, length: usize) -> Result<Bytes, HardwareError> {
        self.env.advance(self.latency);
        let contents = lock(&self.device).read_flash(address, length).ok_or_else(|| {
            HardwareError::Backup { address, length, reason: "outside flash".into() }
        })?;
        self.backups.push((address, length));
        Ok(contents)
    }

    fn restore(&mut self, address: u32, data: &[u8]) -> Result<(), HardwareError> {
        self.env.advance(self.latency);
        if self.fail_restore {
            return Err(HardwareError::Restore { address, reason: "probe write failed".into() });
        }
        if !lock(&self.device).write_flash(address, data) {
            return Err(HardwareError::Restore { address, reason: "outside flash".into() });
        }
        self.restores.push((address, Bytes::copy_from_slice(data)));
        Ok(())
    }

    fn health_check(&mut self) -> bool {
        self.env.advance(self.latency);
        self.healthy
    }
}
