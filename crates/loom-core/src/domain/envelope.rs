//! Run metadata and the result envelope returned by every process run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::RunId;
use super::outcome::Artifact;
use super::spec::ProcessOptions;

/// Created once at run creation; reattached unchanged on every resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: RunId,
    pub process_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Persisted run header (`run.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub metadata: RunMetadata,
    pub inputs: Value,
    #[serde(default)]
    pub options: ProcessOptions,
}

/// The single value a process run produces.
///
/// Domain fields are flattened next to the fixed keys, so a report reads as
/// `{"success": true, "critical_count": 0, "artifacts": [...], ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub success: bool,

    #[serde(flatten)]
    pub fields: Map<String, Value>,

    pub artifacts: Vec<Artifact>,

    pub duration_ms: u64,

    pub metadata: RunMetadata,
}

impl ResultEnvelope {
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Serialized form with `duration_ms` zeroed, for comparing runs.
    pub fn without_timing(&self) -> Value {
        let mut copy = self.clone();
        copy.duration_ms = 0;
        serde_json::to_value(copy).unwrap_or(Value::Null)
    }
}
