//! Gate - quality gate (breakpoint) manager
//!
//! 状態遷移:
//! ```text
//! Pending ──resolve──▶ Approved / Rejected
//!    │
//!    └─escalate──▶ Escalated ──resolve──▶ Approved / Rejected
//!                     └─escalate（audience の更新）
//! ```
//!
//! `raise` は何度呼ばれても同じ結果を返します（replay 時は記録済みの決定）。
//! 保留中の breakpoint は ExecutionContext が `Suspended` に変換し、run を
//! 巻き戻します。決定は別の入口 `resolve` から届きます。
//!
//! 条件付き breakpoint の判定（GatePredicate）はマネージャから切り離した純粋関数です。

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::domain::breakpoint::{BreakpointRecord, BreakpointSpec, GateState};
use crate::domain::decision::Decision;
use crate::domain::errors::{LoomError, StoreError};
use crate::domain::events::JournalEvent;
use crate::domain::ids::{BreakpointId, RunId};
use crate::domain::outcome::TaskResult;
use crate::ports::{Clock, EffectStore, ReviewerChannel};

#[derive(Debug, Clone, PartialEq)]
pub enum GateStatus {
    Decided(Decision),
    Pending(BreakpointRecord),
}

#[derive(Clone)]
pub struct BreakpointManager {
    store: Arc<dyn EffectStore>,
    reviewer: Arc<dyn ReviewerChannel>,
    clock: Arc<dyn Clock>,
}

impl BreakpointManager {
    pub fn new(
        store: Arc<dyn EffectStore>,
        reviewer: Arc<dyn ReviewerChannel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            reviewer,
            clock,
        }
    }

    /// Raise (or re-encounter) a breakpoint.
    pub async fn raise(
        &self,
        run_id: &RunId,
        breakpoint_id: &BreakpointId,
        spec: BreakpointSpec,
    ) -> Result<GateStatus, LoomError> {
        let record = match self.store.load_breakpoint(run_id, breakpoint_id).await? {
            Some(existing) => {
                if let Some(decision) = existing.decision.clone()
                    && !existing.state.is_open()
                {
                    return Ok(GateStatus::Decided(decision));
                }
                existing
            }
            None => {
                let record = BreakpointRecord::pending(
                    breakpoint_id.clone(),
                    spec.into_breakpoint(*run_id),
                    self.clock.now(),
                );
                self.store.put_breakpoint(run_id, &record).await?;
                self.journal(
                    run_id,
                    JournalEvent::BreakpointRaised {
                        breakpoint_id: breakpoint_id.clone(),
                        title: record.breakpoint.title.clone(),
                    },
                )
                .await?;
                info!(
                    run_id = %run_id,
                    breakpoint_id = %breakpoint_id,
                    title = %record.breakpoint.title,
                    "breakpoint raised"
                );
                record
            }
        };

        match self.reviewer.offer(&record).await {
            Some(decision) => {
                let resolved = self.resolve(run_id, breakpoint_id, decision.clone()).await?;
                Ok(GateStatus::Decided(resolved.decision.unwrap_or(decision)))
            }
            None => Ok(GateStatus::Pending(record)),
        }
    }

    /// Record a decision for an open breakpoint.
    pub async fn resolve(
        &self,
        run_id: &RunId,
        breakpoint_id: &BreakpointId,
        decision: Decision,
    ) -> Result<BreakpointRecord, LoomError> {
        let mut record = self.load(run_id, breakpoint_id).await?;
        record
            .resolve(decision, self.clock.now())
            .map_err(|state| transition_error(breakpoint_id, state))?;
        self.store.put_breakpoint(run_id, &record).await?;
        self.journal(
            run_id,
            JournalEvent::BreakpointResolved {
                breakpoint_id: breakpoint_id.clone(),
                state: record.state,
            },
        )
        .await?;
        info!(
            run_id = %run_id,
            breakpoint_id = %breakpoint_id,
            state = ?record.state,
            reviewer = record.decision.as_ref().and_then(|d| d.reviewer.as_deref()).unwrap_or("-"),
            "breakpoint resolved"
        );
        Ok(record)
    }

    pub async fn escalate(
        &self,
        run_id: &RunId,
        breakpoint_id: &BreakpointId,
        audience: &str,
    ) -> Result<BreakpointRecord, LoomError> {
        let mut record = self.load(run_id, breakpoint_id).await?;
        record
            .escalate(audience)
            .map_err(|state| transition_error(breakpoint_id, state))?;
        self.store.put_breakpoint(run_id, &record).await?;
        self.journal(
            run_id,
            JournalEvent::BreakpointEscalated {
                breakpoint_id: breakpoint_id.clone(),
                audience: audience.to_string(),
            },
        )
        .await?;
        info!(run_id = %run_id, breakpoint_id = %breakpoint_id, audience, "breakpoint escalated");
        Ok(record)
    }

    /// Open (pending or escalated) breakpoints of a run.
    pub async fn pending(&self, run_id: &RunId) -> Result<Vec<BreakpointRecord>, LoomError> {
        let records = self.store.list_breakpoints(run_id).await?;
        Ok(records.into_iter().filter(|r| r.state.is_open()).collect())
    }

    async fn load(
        &self,
        run_id: &RunId,
        breakpoint_id: &BreakpointId,
    ) -> Result<BreakpointRecord, LoomError> {
        self.store
            .load_breakpoint(run_id, breakpoint_id)
            .await?
            .ok_or_else(|| {
                StoreError::BreakpointNotFound {
                    run_id: *run_id,
                    breakpoint_id: breakpoint_id.clone(),
                }
                .into()
            })
    }

    async fn journal(&self, run_id: &RunId, event: JournalEvent) -> Result<(), LoomError> {
        self.store
            .append_event(run_id, event, self.clock.now())
            .await?;
        Ok(())
    }
}

fn transition_error(breakpoint_id: &BreakpointId, state: GateState) -> LoomError {
    let state = match state {
        GateState::Pending => "pending",
        GateState::Escalated => "escalated",
        GateState::Approved => "approved",
        GateState::Rejected => "rejected",
    };
    LoomError::GateTransition {
        breakpoint_id: breakpoint_id.clone(),
        state: state.to_string(),
    }
}

/// Decides whether a conditional breakpoint is raised.
///
/// Implementations must be pure: same input, same answer.
pub trait GatePredicate<I: ?Sized>: Send + Sync {
    fn should_raise(&self, input: &I) -> bool;
}

impl<I: ?Sized, F> GatePredicate<I> for F
where
    F: Fn(&I) -> bool + Send + Sync,
{
    fn should_raise(&self, input: &I) -> bool {
        self(input)
    }
}

/// Raise when at least `min_count` entries of an array field carry one of
/// the listed severities.
///
/// Missing fields and entries without a severity count as zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SeverityThreshold {
    pub field: String,
    pub severity_key: String,
    pub severities: Vec<String>,
    pub min_count: usize,
}

impl SeverityThreshold {
    pub fn new<I, S>(field: impl Into<String>, severities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            field: field.into(),
            severity_key: "severity".to_string(),
            severities: severities.into_iter().map(Into::into).collect(),
            min_count: 1,
        }
    }

    /// Any `critical` entry in `findings`.
    pub fn critical() -> Self {
        Self::new("findings", ["critical"])
    }

    pub fn at_least(mut self, min_count: usize) -> Self {
        self.min_count = min_count;
        self
    }

    pub fn severity_key(mut self, key: impl Into<String>) -> Self {
        self.severity_key = key.into();
        self
    }

    pub fn count(&self, value: &Value) -> usize {
        value
            .get(&self.field)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get(&self.severity_key).and_then(Value::as_str))
                    .filter(|sev| self.severities.iter().any(|s| s.eq_ignore_ascii_case(sev)))
                    .count()
            })
            .unwrap_or(0)
    }
}

impl GatePredicate<Value> for SeverityThreshold {
    fn should_raise(&self, input: &Value) -> bool {
        self.min_count > 0 && self.count(input) >= self.min_count
    }
}

impl GatePredicate<TaskResult> for SeverityThreshold {
    fn should_raise(&self, input: &TaskResult) -> bool {
        GatePredicate::<Value>::should_raise(self, &input.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::{RunMetadata, RunRecord};
    use crate::domain::spec::ProcessOptions;
    use crate::impls::{DeferredReviewer, InMemoryStore, PolicyReviewer};
    use crate::ports::SystemClock;
    use chrono::Utc;
    use rstest::rstest;
    use serde_json::json;
    use ulid::Ulid;

    async fn setup(reviewer: Arc<dyn ReviewerChannel>) -> (BreakpointManager, RunId) {
        let store = Arc::new(InMemoryStore::new());
        let run_id = RunId::from_ulid(Ulid::new());
        store
            .create_run(&RunRecord {
                metadata: RunMetadata {
                    run_id,
                    process_id: "audit".into(),
                    timestamp: Utc::now(),
                },
                inputs: json!({}),
                options: ProcessOptions::default(),
            })
            .await
            .unwrap();
        (
            BreakpointManager::new(store, reviewer, Arc::new(SystemClock)),
            run_id,
        )
    }

    fn spec() -> BreakpointSpec {
        BreakpointSpec::new("Critical findings", "Proceed?").field("critical", 1)
    }

    #[tokio::test]
    async fn deferred_gate_stays_pending_until_resolved() {
        let (gates, run_id) = setup(Arc::new(DeferredReviewer)).await;
        let id = BreakpointId::gate(1);

        let status = gates.raise(&run_id, &id, spec()).await.unwrap();
        assert!(matches!(status, GateStatus::Pending(ref r) if r.state == GateState::Pending));
        assert_eq!(gates.pending(&run_id).await.unwrap().len(), 1);

        // raising again does not duplicate the record
        gates.raise(&run_id, &id, spec()).await.unwrap();
        assert_eq!(gates.pending(&run_id).await.unwrap().len(), 1);

        gates
            .resolve(&run_id, &id, Decision::approve().by("alice"))
            .await
            .unwrap();
        assert!(gates.pending(&run_id).await.unwrap().is_empty());

        let replayed = gates.raise(&run_id, &id, spec()).await.unwrap();
        assert!(matches!(replayed, GateStatus::Decided(ref d) if d.is_approved()));
    }

    #[tokio::test]
    async fn resolved_gate_rejects_second_decision() {
        let (gates, run_id) = setup(Arc::new(DeferredReviewer)).await;
        let id = BreakpointId::gate(1);
        gates.raise(&run_id, &id, spec()).await.unwrap();
        gates
            .resolve(&run_id, &id, Decision::reject("no"))
            .await
            .unwrap();

        let err = gates
            .resolve(&run_id, &id, Decision::approve())
            .await
            .unwrap_err();
        assert!(matches!(err, LoomError::GateTransition { ref state, .. } if state == "rejected"));
    }

    #[tokio::test]
    async fn escalation_keeps_gate_open() {
        let (gates, run_id) = setup(Arc::new(DeferredReviewer)).await;
        let id = BreakpointId::gate(1);
        gates.raise(&run_id, &id, spec()).await.unwrap();

        let rec = gates.escalate(&run_id, &id, "security-lead").await.unwrap();
        assert_eq!(rec.state, GateState::Escalated);
        assert_eq!(gates.pending(&run_id).await.unwrap().len(), 1);

        let unknown = gates
            .escalate(&run_id, &BreakpointId::gate(9), "x")
            .await
            .unwrap_err();
        assert!(matches!(
            unknown,
            LoomError::Store(StoreError::BreakpointNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn policy_reviewer_answers_synchronously() {
        let (gates, run_id) = setup(Arc::new(PolicyReviewer::reject_all("freeze"))).await;
        let status = gates
            .raise(&run_id, &BreakpointId::gate(1), spec())
            .await
            .unwrap();
        assert!(matches!(status, GateStatus::Decided(ref d) if !d.is_approved()));
        assert!(gates.pending(&run_id).await.unwrap().is_empty());
    }

    #[rstest]
    #[case::none(json!({"findings": []}), false)]
    #[case::high_only(json!({"findings": [{"severity": "high"}]}), false)]
    #[case::one_critical(json!({"findings": [{"severity": "high"}, {"severity": "CRITICAL"}]}), true)]
    #[case::missing_field(json!({}), false)]
    fn critical_threshold(#[case] value: Value, #[case] expected: bool) {
        assert_eq!(SeverityThreshold::critical().should_raise(&value), expected);
    }

    #[test]
    fn closures_are_predicates() {
        let over_budget = |cost: &u32| *cost > 10;
        assert!(GatePredicate::<u32>::should_raise(&over_budget, &11));
        assert!(!GatePredicate::<u32>::should_raise(&over_budget, &3));
    }
}
