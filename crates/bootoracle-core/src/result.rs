//! Uniform operation results and per-frame transmission diagnostics.

use std::time::Duration;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::OracleError;

/// Number of leading wire bytes kept in a [`TransmissionRecord`]
pub const HEX_PREVIEW_BYTES: usize = 20;

/// Outcome of one client or injector operation.
///
/// Public operations return this instead of `Result` so a failed phase is
/// data the caller inspects, never an error that unwinds a test run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolResult {
    /// Whether the operation (or, for injectors, the expected fault
    /// behavior) succeeded
    pub success: bool,
    /// Human-readable summary
    pub message: String,
    /// Structured details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    /// Stable failure code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ProtocolResult {
    /// Successful result.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into(), data: None, error_code: None }
    }

    /// Failed result with a code.
    #[must_use]
    pub fn failed(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), data: None, error_code: Some(code.into()) }
    }

    /// Failed result describing `err`, prefixed with `context`.
    #[must_use]
    pub fn from_error(context: &str, err: &OracleError) -> Self {
        Self::failed(format!("{context}: {err}"), err.code())
    }

    /// Adds one entry to `data`.
    #[must_use]
    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.get_or_insert_with(Map::new).insert(key.to_string(), value.into());
        self
    }

    /// Looks up one entry of `data`.
    #[must_use]
    pub fn data_value(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|data| data.get(key))
    }

    /// Looks up a boolean entry of `data`.
    #[must_use]
    pub fn data_bool(&self, key: &str) -> Option<bool> {
        self.data_value(key).and_then(Value::as_bool)
    }

    /// Looks up an unsigned entry of `data`.
    #[must_use]
    pub fn data_u64(&self, key: &str) -> Option<u64> {
        self.data_value(key).and_then(Value::as_u64)
    }
}

/// Diagnostic record of one frame written to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransmissionRecord {
    /// Phase name, or a label for raw fault-injection writes
    pub frame_type: String,
    /// Sequence id, when the frame carries a request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<u32>,
    /// Bytes on the wire, escapes included
    pub frame_length_total: usize,
    /// Unescaped payload length
    pub payload_length: usize,
    /// Bytes the transport accepted
    pub bytes_written: usize,
    /// Time spent writing and flushing
    #[serde(rename = "transmission_time_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// Whether the full frame was written
    pub success: bool,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Hex of the first [`HEX_PREVIEW_BYTES`] wire bytes
    pub hex_preview: String,
}

impl TransmissionRecord {
    /// Hex preview of a wire buffer.
    #[must_use]
    pub fn preview(wire: &[u8]) -> String {
        wire.iter().take(HEX_PREVIEW_BYTES).map(|b| format!("{b:02x}")).collect()
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_micros() as f64 / 1000.0)
}

/// Serializes a duration as fractional seconds.
pub(crate) fn serialize_secs<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}
