//! Attempt records: one delegate call try of a task.
//!
//! Persisted inside `tasks/<effect_id>/error.json` when a task fails, so the
//! failure explains itself (what was tried, how often, what came back).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::DelegateFailureKind;
use super::ids::EffectId;
use super::shape::Violation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Replied,
    Failed {
        kind: DelegateFailureKind,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-indexed.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

/// Diagnostic document written when a task does not produce a valid result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub effect_id: EffectId,
    pub code: String,
    pub message: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,

    /// Raw delegate payload, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,

    pub attempts: Vec<AttemptRecord>,
}
