//! Events - run journal のイベント
//!
//! journal は run ごとの追記専用ログ（`journal.jsonl`）です。
//! 状態の正本は tasks/ と breakpoints/ のドキュメントで、journal は監査と
//! 「なぜ止まっているか」の説明に使います。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::breakpoint::GateState;
use super::descriptor::{DelegateName, TaskKind};
use super::ids::{BreakpointId, EffectId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalEvent {
    RunCreated {
        process_id: String,
    },
    EffectRequested {
        effect_id: EffectId,
        kind: TaskKind,
        title: String,
        delegate: DelegateName,
        fingerprint: String,
    },
    EffectResolved {
        effect_id: EffectId,
        attempts: u32,
        artifact_count: usize,
    },
    EffectFailed {
        effect_id: EffectId,
        attempts: u32,
        code: String,
        message: String,
    },
    BreakpointRaised {
        breakpoint_id: BreakpointId,
        title: String,
    },
    BreakpointEscalated {
        breakpoint_id: BreakpointId,
        audience: String,
    },
    BreakpointResolved {
        breakpoint_id: BreakpointId,
        state: GateState,
    },
    RunSuspended {
        breakpoint_id: BreakpointId,
    },
    RunCompleted {
        success: bool,
        artifact_count: usize,
    },
    RunFailed {
        code: String,
        message: String,
    },
    /// Stopped by a cancel signal; not finalized, can be resumed.
    RunCancelled,
}

/// One line of `journal.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// 1-indexed, assigned by the store on append.
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: JournalEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn entry_is_a_flat_json_line() {
        let entry = JournalEntry {
            seq: 3,
            recorded_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            event: JournalEvent::EffectResolved {
                effect_id: EffectId::task(2),
                attempts: 1,
                artifact_count: 0,
            },
        };
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["type"], "EFFECT_RESOLVED");
        assert_eq!(v["effect_id"], "t0002");
        assert_eq!(v["seq"], 3);

        let back: JournalEntry = serde_json::from_value(v).unwrap();
        assert_eq!(back, entry);
    }
}
