//! mcpredact_audit_spec
//!
//! The schema for one audit record: which upstream tool was called, which
//! compliance profile governed it, what was redacted, and how it went. One
//! `AuditEntry` is emitted per tool call; `mcpredact_audit_log` owns writing
//! it to disk. An `AuditEntry` lives only between construction and its
//! serialization to the audit sink — it is never stored or queried in
//! memory beyond that.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    Error,
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    DateTime::parse_from_rfc3339(&raw).map(|dt| dt.with_timezone(&Utc)).map_err(serde::de::Error::custom)
}

/// One audit record for a single tool call. Field names and shape match
/// the external JSONL contract byte-for-byte; do not rename without
/// updating the audit line format downstream consumers parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(serialize_with = "serialize_timestamp", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub upstream_tool: String,
    pub compliance_profile: String,
    /// Serialized invocation arguments, truncated to 500 bytes with a
    /// `...[truncated]` suffix when longer.
    pub input_parameters: String,
    pub output_size_bytes: u64,
    pub redaction_count: u64,
    pub redacted_types: BTreeSet<String>,
    pub execution_time_ms: u64,
    pub status: CallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[allow(clippy::too_many_arguments)]
impl AuditEntry {
    pub fn new(
        upstream_tool: impl Into<String>,
        compliance_profile: impl Into<String>,
        input_parameters: impl Into<String>,
        output_size_bytes: u64,
        redaction_count: u64,
        redacted_types: BTreeSet<String>,
        execution_time_ms: u64,
        status: CallStatus,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        AuditEntry {
            timestamp: now,
            upstream_tool: upstream_tool.into(),
            compliance_profile: compliance_profile.into(),
            input_parameters: input_parameters.into(),
            output_size_bytes,
            redaction_count,
            redacted_types,
            execution_time_ms,
            status,
            error_message,
        }
    }
}
