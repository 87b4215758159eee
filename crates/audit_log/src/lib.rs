//! mcpredact_audit_log
//!
//! Append-only JSONL audit sink. One line per `AuditEntry`, written and
//! flushed atomically under a single lock so concurrent tool calls never
//! interleave partial lines.
//!
//! The line itself is never truncated — it must stay valid JSON. Instead
//! `truncate_input_parameters` caps the `input_parameters` field's content
//! before it's embedded in an `AuditEntry`, so a pathological tool call
//! with huge arguments can't blow up the log line without ever producing
//! an unparsable record.

use mcpredact_audit_spec::AuditEntry;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

/// `input_parameters` content longer than this is truncated before it's
/// attached to an `AuditEntry`.
pub const MAX_INPUT_PARAMETERS_BYTES: usize = 500;
const TRUNCATION_MARKER: &str = "...[truncated]";

/// Truncate `serialized` (a JSON-serialized copy of a tool call's
/// arguments) to `MAX_INPUT_PARAMETERS_BYTES` with a trailing
/// `...[truncated]` marker, leaving it short enough to embed as a JSON
/// string value without risking oversized audit lines.
pub fn truncate_input_parameters(serialized: &str) -> String {
    if serialized.len() <= MAX_INPUT_PARAMETERS_BYTES {
        return serialized.to_string();
    }
    let mut boundary = MAX_INPUT_PARAMETERS_BYTES;
    while boundary > 0 && !serialized.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!("{}{}", &serialized[..boundary], TRUNCATION_MARKER)
}

#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

enum Sink {
    File(Mutex<BufWriter<File>>),
    Disabled,
}

/// The audit sink. When constructed with `enabled: false`, `append` is a
/// no-op and never touches the filesystem.
pub struct AuditSink {
    sink: Sink,
}

impl AuditSink {
    pub fn open(path: impl AsRef<Path>, enabled: bool) -> Result<Self, AuditLogError> {
        if !enabled {
            return Ok(AuditSink { sink: Sink::Disabled });
        }
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(AuditSink {
            sink: Sink::File(Mutex::new(BufWriter::new(file))),
        })
    }

    pub fn enabled(&self) -> bool {
        matches!(self.sink, Sink::File(_))
    }

    /// Serialize `entry` as one JSON line and write it, including the
    /// trailing newline, atomically under the sink's lock. A no-op when
    /// the sink is disabled.
    pub fn append(&self, entry: &AuditEntry) -> Result<(), AuditLogError> {
        let writer = match &self.sink {
            Sink::Disabled => return Ok(()),
            Sink::File(writer) => writer,
        };

        let line = serde_json::to_string(entry)?;

        let mut writer = writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}
