//! JSON result file.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use bootoracle_core::RunReport;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// Version stamped into every result file
pub const ORACLE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Top-level document written by `--json-output`.
#[derive(Debug, Serialize)]
pub struct ResultFile<'a> {
    oracle_version: &'static str,
    test_type: &'static str,
    test_name: &'a str,
    device: &'a str,
    timestamp: String,
    total_time: f64,
    result: &'a RunReport,
}

impl<'a> ResultFile<'a> {
    /// Wraps `result`, stamped with the current UTC time.
    pub fn new(device: &'a str, total_time: Duration, result: &'a RunReport) -> Self {
        Self {
            oracle_version: ORACLE_VERSION,
            test_type: result.kind(),
            test_name: result.name(),
            device,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            total_time: total_time.as_secs_f64(),
            result,
        }
    }

    /// Writes the document to a sibling temporary file, then renames it over
    /// `path`.
    ///
    /// # Errors
    ///
    /// Serialization or I/O failures. `path` is untouched on failure.
    pub fn write_atomically(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self).context("serializing results")?;
        let staging = staging_path(path);
        fs::write(&staging, json)
            .with_context(|| format!("writing {}", staging.display()))?;
        if let Err(err) = fs::rename(&staging, path) {
            let _ = fs::remove_file(&staging);
            return Err(err).with_context(|| format!("moving results to {}", path.display()));
        }
        tracing::info!(path = %path.display(), "results written");
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "results".into());
    name.push(".partial");
    path.with_file_name(name)
}
