//! Hardware collaborator: reset, flash backup and restore.
//!
//! The orchestrator never flashes a device without first reading back the
//! region a scenario may overwrite. [`BackupGuard`] holds that snapshot and
//! writes it back when the scenario ends, whether it passed, failed or
//! returned early. Restoring explicitly surfaces the error; dropping the
//! guard restores and logs.

use bytes::Bytes;
use thiserror::Error;

/// Failures of the hardware collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    /// Debug probe or reset line unavailable
    #[error("hardware unavailable: {0}")]
    Unavailable(String),

    /// Reading flash failed
    #[error("flash backup of {length} bytes at {address:#010x} failed: {reason}")]
    Backup {
        /// Start address
        address: u32,
        /// Bytes requested
        length: usize,
        /// Probe's reason
        reason: String,
    },

    /// Writing flash back failed
    #[error("flash restore at {address:#010x} failed: {reason}")]
    Restore {
        /// Start address
        address: u32,
        /// Probe's reason
        reason: String,
    },

    /// Reset or run command failed
    #[error("reset failed: {0}")]
    Reset(String),
}

/// Out-of-band control of the device under test.
pub trait HardwareControl {
    /// Resets the target and lets it run into the bootloader.
    ///
    /// # Errors
    ///
    /// `HardwareError::Reset` if the target could not be reset.
    fn reset_and_run(&mut self) -> Result<(), HardwareError>;

    /// Reads `length` bytes of flash starting at `address`.
    ///
    /// # Errors
    ///
    /// `HardwareError::Backup` if the read fails.
    fn backup(&mut self, address: u32, length: usize) -> Result<Bytes, HardwareError>;

    /// Writes `data` to flash starting at `address`.
    ///
    /// # Errors
    ///
    /// `HardwareError::Restore` if the write fails.
    fn restore(&mut self, address: u32, data: &[u8]) -> Result<(), HardwareError>;

    /// Whether the collaborator can currently act on the target.
    fn health_check(&mut self) -> bool;
}

impl<H: HardwareControl + ?Sized> HardwareControl for &mut H {
    fn reset_and_run(&mut self) -> Result<(), HardwareError> {
        (**self).reset_and_run()
    }

    fn backup(&mut self, address: u32, length: usize) -> Result<Bytes, HardwareError> {
        (**self).backup(address, length)
    }

    fn restore(&mut self, address: u32, data: &[u8]) -> Result<(), HardwareError> {
        (**self).restore(address, data)
    }

    fn health_check(&mut self) -> bool {
        (**self).health_check()
    }
}

/// Hardware managed outside this process.
///
/// Resets are left to the operator and there is no probe to read flash
/// with, so backups are empty and restores write nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternallyManaged;

impl HardwareControl for ExternallyManaged {
    fn reset_and_run(&mut self) -> Result<(), HardwareError> {
        tracing::info!("reset requested; target reset is managed externally");
        Ok(())
    }

    fn backup(&mut self, address: u32, length: usize) -> Result<Bytes, HardwareError> {
        tracing::debug!(address, length, "no probe attached; skipping flash backup");
        Ok(Bytes::new())
    }

    fn restore(&mut self, _address: u32, _data: &[u8]) -> Result<(), HardwareError> {
        Ok(())
    }

    fn health_check(&mut self) -> bool {
        true
    }
}

/// Snapshot of one flash region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashBackup {
    /// Start address
    pub address: u32,
    /// Contents at backup time
    pub original: Bytes,
}

/// Restores a [`FlashBackup`] when the scenario that took it ends.
pub struct BackupGuard<'a, H: HardwareControl + ?Sized> {
    hardware: &'a mut H,
    backup: Option<FlashBackup>,
}

impl<'a, H: HardwareControl + ?Sized> BackupGuard<'a, H> {
    /// Backs up `length` bytes at `address`.
    ///
    /// # Errors
    ///
    /// `HardwareError::Backup` if the region cannot be read; nothing is
    /// guarded in that case.
    pub fn acquire(
        hardware: &'a mut H,
        address: u32,
        length: usize,
    ) -> Result<Self, HardwareError> {
        let original = hardware.backup(address, length)?;
        tracing::debug!(address, bytes = original.len(), "flash backed up");
        Ok(Self { hardware, backup: Some(FlashBackup { address, original }) })
    }

    /// The snapshot taken
    pub fn backup(&self) -> Option<&FlashBackup> {
        self.backup.as_ref()
    }

    /// Hardware, for use while the guard is held
    pub fn hardware(&mut self) -> &mut H {
        &mut *self.hardware
    }

    /// Writes the snapshot back.
    ///
    /// # Errors
    ///
    /// `HardwareError::Restore` if the write fails.
    pub fn restore(mut self) -> Result<(), HardwareError> {
        self.restore_now()
    }

    fn restore_now(&mut self) -> Result<(), HardwareError> {
        let Some(backup) = self.backup.take() else {
            return Ok(());
        };
        self.hardware.restore(backup.address, &backup.original)?;
        tracing::debug!(address = backup.address, bytes = backup.original.len(), "flash restored");
        Ok(())
    }
}

impl<H: HardwareControl + ?Sized> Drop for BackupGuard<'_, H> {
    fn drop(&mut self) {
        if let Err(err) = self.restore_now() {
            tracing::error!(error = %err, "flash restore failed; device may hold test firmware");
        }
    }
}

impl<H: HardwareControl + ?Sized> std::fmt::Debug for BackupGuard<'_, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupGuard").field("backup", &self.backup).finish_non_exhaustive()
    }
}
