// ── Change tracking ──
//
// Remembers a digest of the last seen snapshot so reconciliation can tell
// whether a refetched device actually changed, and keeps a short ring of
// recent errors for diagnostics.

use std::collections::VecDeque;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use strum::Display;

/// How many errors the ring keeps.
pub const ERROR_HISTORY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedError {
    pub operation: String,
    pub message: String,
    pub severity: Severity,
    pub at: DateTime<Utc>,
}

impl TrackedError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            severity,
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct DeviceTracker {
    last_hash: Option<String>,
    errors: VecDeque<TrackedError>,
}

impl DeviceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash `snapshot` and compare with the previous call. The first call
    /// always reports a change. A snapshot that cannot be serialized is
    /// reported as changed and forgets the previous digest.
    pub fn has_changed<T: Serialize + ?Sized>(&mut self, snapshot: &T) -> bool {
        let Some(hash) = digest(snapshot) else {
            self.last_hash = None;
            return true;
        };
        let changed = self.last_hash.as_deref() != Some(hash.as_str());
        self.last_hash = Some(hash);
        changed
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    pub fn record_error(&mut self, error: TrackedError) {
        if self.errors.len() == ERROR_HISTORY {
            self.errors.pop_front();
        }
        self.errors.push_back(error);
    }

    /// Oldest first.
    pub fn errors(&self) -> Vec<TrackedError> {
        self.errors.iter().cloned().collect()
    }
}

/// SHA-256 of the key-sorted canonical JSON form, hex encoded.
fn digest<T: Serialize + ?Sized>(snapshot: &T) -> Option<String> {
    let value = serde_json::to_value(snapshot).ok()?;
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical)?;
    Some(hex::encode(Sha256::digest(canonical.as_bytes())))
}

fn write_canonical(value: &Value, out: &mut String) -> Option<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).ok()?);
                out.push(':');
                write_canonical(map.get(key.as_str())?, out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        leaf => write!(out, "{leaf}").ok()?,
    }
    Some(())
}
