//! Errors - エラー型と分類
//!
//! `LoomError` は process 定義まで伝播する型付きエラーです。
//! `kind()` で運用上の分類（リトライすべきか等）を取り出せます。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::descriptor::DelegateName;
use super::ids::{BreakpointId, EffectId, RunId};
use super::shape::ValidationError;

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（リトライ無意味）
/// - Infrastructure: インフラエラー（ストレージの障害など）
/// - Control: エラーではなく制御フロー（中断・キャンセル）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
    Control,
}

/// Why a delegate call did not produce a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegateFailureKind {
    /// The delegate answered with an explicit error payload.
    Refused,
    /// The delegate could not be reached.
    Unavailable,
    /// The call exceeded its time limit.
    Timeout,
}

impl DelegateFailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            DelegateFailureKind::Unavailable | DelegateFailureKind::Timeout
        )
    }
}

/// Failure reported by a delegate port implementation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct DelegateError {
    pub kind: DelegateFailureKind,
    pub message: String,
}

impl DelegateError {
    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            kind: DelegateFailureKind::Refused,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: DelegateFailureKind::Unavailable,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: DelegateFailureKind::Timeout,
            message: message.into(),
        }
    }
}

/// A delegate failure after the retry policy gave up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegateFailure {
    pub effect_id: EffectId,
    pub delegate: DelegateName,
    pub kind: DelegateFailureKind,
    pub message: String,
    pub attempts: u32,
}

impl fmt::Display for DelegateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "delegate `{}` failed for {} after {} attempt(s) ({:?}): {}",
            self.delegate, self.effect_id, self.attempts, self.kind, self.message
        )
    }
}

/// Persistence layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt document at {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("run {0} not found")]
    RunNotFound(RunId),

    #[error("run {0} already exists")]
    RunExists(RunId),

    #[error("breakpoint {breakpoint_id} not found in run {run_id}")]
    BreakpointNotFound {
        run_id: RunId,
        breakpoint_id: BreakpointId,
    },

    #[error("conflicting write to {0}: a different document already exists")]
    Conflict(String),
}

#[derive(Debug, Error)]
pub enum LoomError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Delegate(DelegateFailure),

    #[error("breakpoint {breakpoint_id} was rejected{}", note_suffix(.note))]
    GateRejected {
        breakpoint_id: BreakpointId,
        note: Option<String>,
    },

    #[error(
        "replay inconsistency at {effect_id}: persisted descriptor {found} does not match rebuilt descriptor {expected}"
    )]
    ReplayInconsistency {
        effect_id: EffectId,
        expected: String,
        found: String,
    },

    #[error("run suspended at breakpoint {breakpoint_id}")]
    Suspended { breakpoint_id: BreakpointId },

    #[error("cancelled")]
    Cancelled,

    #[error("breakpoint {breakpoint_id} is already {state}")]
    GateTransition {
        breakpoint_id: BreakpointId,
        state: String,
    },

    #[error("result envelope was already finalized")]
    AlreadyFinalized,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn note_suffix(note: &Option<String>) -> String {
    note.as_deref().map(|n| format!(": {n}")).unwrap_or_default()
}

impl LoomError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoomError::Delegate(f) if f.kind.is_retryable() => ErrorKind::Transient,
            LoomError::Delegate(_)
            | LoomError::Validation(_)
            | LoomError::GateRejected { .. }
            | LoomError::ReplayInconsistency { .. }
            | LoomError::GateTransition { .. }
            | LoomError::AlreadyFinalized
            | LoomError::InvalidInput(_) => ErrorKind::Permanent,
            LoomError::Store(_) => ErrorKind::Infrastructure,
            LoomError::Suspended { .. } | LoomError::Cancelled => ErrorKind::Control,
        }
    }

    /// Short stable name, used in journal entries and failure envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            LoomError::Validation(_) => "validation_error",
            LoomError::Delegate(_) => "delegate_failure",
            LoomError::GateRejected { .. } => "gate_rejected",
            LoomError::ReplayInconsistency { .. } => "replay_inconsistency",
            LoomError::Suspended { .. } => "suspended",
            LoomError::Cancelled => "cancelled",
            LoomError::GateTransition { .. } => "gate_transition",
            LoomError::AlreadyFinalized => "already_finalized",
            LoomError::InvalidInput(_) => "invalid_input",
            LoomError::Store(_) => "store_error",
        }
    }
}
