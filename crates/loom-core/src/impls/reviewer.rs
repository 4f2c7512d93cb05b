//! ReviewerChannel の実装
//!
//! - DeferredReviewer: 常に保留（決定は後で CLI / API の `resolve` から届く）
//! - PolicyReviewer: 方針で即決（テスト・無人実行用）

use async_trait::async_trait;
use tracing::info;

use crate::domain::breakpoint::BreakpointRecord;
use crate::domain::decision::Decision;
use crate::ports::ReviewerChannel;

#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredReviewer;

#[async_trait]
impl ReviewerChannel for DeferredReviewer {
    async fn offer(&self, record: &BreakpointRecord) -> Option<Decision> {
        info!(
            breakpoint_id = %record.id,
            run_id = %record.breakpoint.context.run_id,
            title = %record.breakpoint.title,
            "breakpoint awaiting review"
        );
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PolicyReviewer {
    ApproveAll,
    RejectAll { note: String },
}

impl PolicyReviewer {
    pub fn approve_all() -> Self {
        PolicyReviewer::ApproveAll
    }

    pub fn reject_all(note: impl Into<String>) -> Self {
        PolicyReviewer::RejectAll { note: note.into() }
    }
}

#[async_trait]
impl ReviewerChannel for PolicyReviewer {
    async fn offer(&self, record: &BreakpointRecord) -> Option<Decision> {
        let decision = match self {
            PolicyReviewer::ApproveAll => Decision::approve(),
            PolicyReviewer::RejectAll { note } => Decision::reject(note.clone()),
        }
        .by("policy");
        info!(
            breakpoint_id = %record.id,
            verdict = ?decision.verdict,
            "breakpoint decided by policy"
        );
        Some(decision)
    }
}
