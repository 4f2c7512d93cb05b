//! Breakpoint - 人間のレビューを待つ中断点
//!
//! # 状態遷移
//! - Pending -> Approved / Rejected / Escalated
//! - Escalated -> Approved / Rejected / Escalated（宛先が変わるだけで Pending と同じ扱い）
//!
//! Approved / Rejected は終端。終端からの遷移はエラーになります。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::decision::{Decision, Verdict};
use super::ids::{BreakpointId, RunId};

/// File reference shown to the reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub path: String,
    pub format: String,
}

impl FileRef {
    pub fn new(path: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            format: format.into(),
        }
    }
}

/// Context handed to the reviewer alongside the question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointContext {
    pub run_id: RunId,

    #[serde(default)]
    pub files: Vec<FileRef>,

    /// Domain fields (finding counts, scores, ...).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A question for a human reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub question: String,
    pub title: String,
    pub context: BreakpointContext,
}

/// What a process passes to `ctx.breakpoint(..)`; the context fills in `run_id`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BreakpointSpec {
    pub question: String,
    pub title: String,
    pub files: Vec<FileRef>,
    pub fields: Map<String, Value>,
}

impl BreakpointSpec {
    pub fn new(title: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            title: title.into(),
            files: Vec::new(),
            fields: Map::new(),
        }
    }

    pub fn file(mut self, path: impl Into<String>, format: impl Into<String>) -> Self {
        self.files.push(FileRef::new(path, format));
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn into_breakpoint(self, run_id: RunId) -> Breakpoint {
        Breakpoint {
            question: self.question,
            title: self.title,
            context: BreakpointContext {
                run_id,
                files: self.files,
                fields: self.fields,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Pending,
    Escalated,
    Approved,
    Rejected,
}

impl GateState {
    pub fn is_open(self) -> bool {
        matches!(self, GateState::Pending | GateState::Escalated)
    }
}

impl From<Verdict> for GateState {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Approved => GateState::Approved,
            Verdict::Rejected => GateState::Rejected,
        }
    }
}

/// Persisted form of a breakpoint (`breakpoints/<id>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointRecord {
    pub id: BreakpointId,
    pub breakpoint: Breakpoint,
    pub state: GateState,

    /// Who is expected to answer (set on escalation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,

    pub raised_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl BreakpointRecord {
    pub fn pending(id: BreakpointId, breakpoint: Breakpoint, raised_at: DateTime<Utc>) -> Self {
        Self {
            id,
            breakpoint,
            state: GateState::Pending,
            audience: None,
            decision: None,
            raised_at,
            resolved_at: None,
        }
    }

    /// Record a decision. Only open gates accept one.
    pub fn resolve(&mut self, decision: Decision, at: DateTime<Utc>) -> Result<(), GateState> {
        if !self.state.is_open() {
            return Err(self.state);
        }
        self.state = decision.verdict.into();
        self.decision = Some(decision);
        self.resolved_at = Some(at);
        Ok(())
    }

    pub fn escalate(&mut self, audience: impl Into<String>) -> Result<(), GateState> {
        if !self.state.is_open() {
            return Err(self.state);
        }
        self.state = GateState::Escalated;
        self.audience = Some(audience.into());
        Ok(())
    }
}
