//! Status - run の現在地を journal から説明する
//!
//! 「なぜ止まっているか」に答えるためのビューです。状態の正本は
//! tasks/ と breakpoints/ のドキュメントで、ここでは journal を要約するだけです。

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::breakpoint::BreakpointRecord;
use crate::domain::envelope::RunRecord;
use crate::domain::events::{JournalEntry, JournalEvent};
use crate::domain::ids::{BreakpointId, EffectId, RunId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Running,
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub process_id: String,
    pub created_at: DateTime<Utc>,
    pub phase: RunPhase,
    pub effects_requested: usize,
    pub effects_resolved: usize,
    pub failed_effects: Vec<EffectId>,
    pub pending_breakpoints: Vec<BreakpointId>,
    pub last_event_at: Option<DateTime<Utc>>,
}

pub fn summarize(
    record: &RunRecord,
    journal: &[JournalEntry],
    pending: &[BreakpointRecord],
) -> RunSummary {
    let mut phase = RunPhase::Running;
    let mut effects_requested = 0;
    let mut effects_resolved = 0;
    let mut failed_effects = Vec::new();

    for entry in journal {
        match &entry.event {
            JournalEvent::RunCreated { .. } => phase = RunPhase::Running,
            JournalEvent::EffectRequested { .. } => {
                effects_requested += 1;
                phase = RunPhase::Running;
            }
            JournalEvent::EffectResolved { .. } => effects_resolved += 1,
            JournalEvent::EffectFailed { effect_id, .. } => failed_effects.push(effect_id.clone()),
            JournalEvent::RunSuspended { .. } => phase = RunPhase::Suspended,
            JournalEvent::RunCompleted { success: true, .. } => phase = RunPhase::Completed,
            JournalEvent::RunCompleted { success: false, .. } | JournalEvent::RunFailed { .. } => {
                phase = RunPhase::Failed
            }
            JournalEvent::RunCancelled => phase = RunPhase::Cancelled,
            JournalEvent::BreakpointRaised { .. }
            | JournalEvent::BreakpointEscalated { .. }
            | JournalEvent::BreakpointResolved { .. } => {}
        }
    }

    RunSummary {
        run_id: record.metadata.run_id,
        process_id: record.metadata.process_id.clone(),
        created_at: record.metadata.timestamp,
        phase,
        effects_requested,
        effects_resolved,
        failed_effects,
        pending_breakpoints: pending.iter().map(|r| r.id.clone()).collect(),
        last_event_at: journal.last().map(|e| e.recorded_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::RunMetadata;
    use crate::domain::spec::ProcessOptions;
    use serde_json::json;
    use ulid::Ulid;

    fn entry(seq: u64, event: JournalEvent) -> JournalEntry {
        JournalEntry {
            seq,
            recorded_at: Utc::now(),
            event,
        }
    }

    fn record() -> RunRecord {
        RunRecord {
            metadata: RunMetadata {
                run_id: RunId::from_ulid(Ulid::nil()),
                process_id: "audit".into(),
                timestamp: Utc::now(),
            },
            inputs: json!({}),
            options: ProcessOptions::default(),
        }
    }

    #[test]
    fn suspended_run_reports_its_gate() {
        let journal = vec![
            entry(1, JournalEvent::RunCreated { process_id: "audit".into() }),
            entry(2, JournalEvent::BreakpointRaised { breakpoint_id: BreakpointId::gate(1), title: "t".into() }),
            entry(3, JournalEvent::RunSuspended { breakpoint_id: BreakpointId::gate(1) }),
        ];
        let summary = summarize(&record(), &journal, &[]);
        assert_eq!(summary.phase, RunPhase::Suspended);
        assert_eq!(summary.last_event_at, Some(journal[2].recorded_at));
    }

    #[test]
    fn failed_effects_are_listed() {
        let journal = vec![
            entry(1, JournalEvent::RunCreated { process_id: "audit".into() }),
            entry(
                2,
                JournalEvent::EffectFailed {
                    effect_id: EffectId::task(1),
                    attempts: 1,
                    code: "validation_error".into(),
                    message: "bad".into(),
                },
            ),
            entry(3, JournalEvent::RunFailed { code: "validation_error".into(), message: "bad".into() }),
        ];
        let summary = summarize(&record(), &journal, &[]);
        assert_eq!(summary.phase, RunPhase::Failed);
        assert_eq!(summary.failed_effects, vec![EffectId::task(1)]);
    }
}
