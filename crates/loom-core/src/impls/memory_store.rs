//! InMemoryStore - テスト・デモ用の EffectStore
//!
//! # 実装詳細
//! - run ごとに `RunSlot` を 1 つ持つ（HashMap<RunId, RunSlot>）
//! - std の Mutex で排他制御（await をまたいでロックを保持しない）
//! - プロセス終了で消えるので、resume のテストは同じインスタンスを共有して行う

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::attempt::FailureRecord;
use crate::domain::breakpoint::BreakpointRecord;
use crate::domain::envelope::{ResultEnvelope, RunRecord};
use crate::domain::errors::StoreError;
use crate::domain::events::{JournalEntry, JournalEvent};
use crate::domain::ids::{BreakpointId, EffectId, RunId};
use crate::ports::{EffectStore, RequestRecord};

#[derive(Debug)]
struct RunSlot {
    record: RunRecord,
    requests: HashMap<EffectId, RequestRecord>,
    results: HashMap<EffectId, Value>,
    failures: HashMap<EffectId, FailureRecord>,
    breakpoints: BTreeMap<BreakpointId, BreakpointRecord>,
    journal: Vec<JournalEntry>,
    output: Option<ResultEnvelope>,
}

impl RunSlot {
    fn new(record: RunRecord) -> Self {
        Self {
            record,
            requests: HashMap::new(),
            results: HashMap::new(),
            failures: HashMap::new(),
            breakpoints: BTreeMap::new(),
            journal: Vec::new(),
            output: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    runs: Mutex<HashMap<RunId, RunSlot>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RunId, RunSlot>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_run<T>(
        &self,
        run_id: &RunId,
        f: impl FnOnce(&mut RunSlot) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut runs = self.lock();
        let slot = runs
            .get_mut(run_id)
            .ok_or(StoreError::RunNotFound(*run_id))?;
        f(slot)
    }
}

#[async_trait]
impl EffectStore for InMemoryStore {
    async fn create_run(&self, record: &RunRecord) -> Result<(), StoreError> {
        let mut runs = self.lock();
        let run_id = record.metadata.run_id;
        if runs.contains_key(&run_id) {
            return Err(StoreError::RunExists(run_id));
        }
        runs.insert(run_id, RunSlot::new(record.clone()));
        Ok(())
    }

    async fn load_run(&self, run_id: &RunId) -> Result<RunRecord, StoreError> {
        self.with_run(run_id, |slot| Ok(slot.record.clone()))
    }

    async fn list_runs(&self) -> Result<Vec<RunId>, StoreError> {
        let mut ids: Vec<RunId> = self.lock().keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn load_request(
        &self,
        run_id: &RunId,
        effect_id: &EffectId,
    ) -> Result<Option<RequestRecord>, StoreError> {
        self.with_run(run_id, |slot| Ok(slot.requests.get(effect_id).cloned()))
    }

    async fn put_request(&self, run_id: &RunId, request: &RequestRecord) -> Result<(), StoreError> {
        self.with_run(run_id, |slot| {
            slot.requests
                .insert(request.effect_id.clone(), request.clone());
            Ok(())
        })
    }

    async fn load_result(
        &self,
        run_id: &RunId,
        effect_id: &EffectId,
    ) -> Result<Option<Value>, StoreError> {
        self.with_run(run_id, |slot| Ok(slot.results.get(effect_id).cloned()))
    }

    async fn put_result(
        &self,
        run_id: &RunId,
        effect_id: &EffectId,
        result: &Value,
    ) -> Result<(), StoreError> {
        self.with_run(run_id, |slot| match slot.results.get(effect_id) {
            Some(existing) if existing == result => Ok(()),
            Some(_) => Err(StoreError::Conflict(format!(
                "{run_id}/tasks/{effect_id}/result.json"
            ))),
            None => {
                slot.results.insert(effect_id.clone(), result.clone());
                Ok(())
            }
        })
    }

    async fn put_failure(&self, run_id: &RunId, failure: &FailureRecord) -> Result<(), StoreError> {
        self.with_run(run_id, |slot| {
            slot.failures
                .insert(failure.effect_id.clone(), failure.clone());
            Ok(())
        })
    }

    async fn load_failure(
        &self,
        run_id: &RunId,
        effect_id: &EffectId,
    ) -> Result<Option<FailureRecord>, StoreError> {
        self.with_run(run_id, |slot| Ok(slot.failures.get(effect_id).cloned()))
    }

    async fn load_breakpoint(
        &self,
        run_id: &RunId,
        breakpoint_id: &BreakpointId,
    ) -> Result<Option<BreakpointRecord>, StoreError> {
        self.with_run(run_id, |slot| Ok(slot.breakpoints.get(breakpoint_id).cloned()))
    }

    async fn put_breakpoint(
        &self,
        run_id: &RunId,
        record: &BreakpointRecord,
    ) -> Result<(), StoreError> {
        self.with_run(run_id, |slot| {
            slot.breakpoints.insert(record.id.clone(), record.clone());
            Ok(())
        })
    }

    async fn list_breakpoints(&self, run_id: &RunId) -> Result<Vec<BreakpointRecord>, StoreError> {
        self.with_run(run_id, |slot| Ok(slot.breakpoints.values().cloned().collect()))
    }

    async fn append_event(
        &self,
        run_id: &RunId,
        event: JournalEvent,
        recorded_at: DateTime<Utc>,
    ) -> Result<JournalEntry, StoreError> {
        self.with_run(run_id, |slot| {
            let entry = JournalEntry {
                seq: slot.journal.len() as u64 + 1,
                recorded_at,
                event,
            };
            slot.journal.push(entry.clone());
            Ok(entry)
        })
    }

    async fn read_journal(&self, run_id: &RunId) -> Result<Vec<JournalEntry>, StoreError> {
        self.with_run(run_id, |slot| Ok(slot.journal.clone()))
    }

    async fn put_output(&self, run_id: &RunId, envelope: &ResultEnvelope) -> Result<(), StoreError> {
        self.with_run(run_id, |slot| {
            slot.output = Some(envelope.clone());
            Ok(())
        })
    }

    async fn load_output(&self, run_id: &RunId) -> Result<Option<ResultEnvelope>, StoreError> {
        self.with_run(run_id, |slot| Ok(slot.output.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::RunMetadata;
    use crate::domain::spec::ProcessOptions;
    use chrono::TimeZone;
    use serde_json::json;
    use ulid::Ulid;

    fn header() -> RunRecord {
        RunRecord {
            metadata: RunMetadata {
                run_id: RunId::from_ulid(Ulid::new()),
                process_id: "audit".to_string(),
                timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            },
            inputs: json!({"target": "contracts/"}),
            options: ProcessOptions::default(),
        }
    }

    #[tokio::test]
    async fn run_can_only_be_created_once() {
        let store = InMemoryStore::new();
        let rec = header();
        store.create_run(&rec).await.unwrap();
        let err = store.create_run(&rec).await.unwrap_err();
        assert!(matches!(err, StoreError::RunExists(_)));
        assert_eq!(store.load_run(&rec.metadata.run_id).await.unwrap(), rec);
    }

    #[tokio::test]
    async fn unknown_run_is_reported() {
        let store = InMemoryStore::new();
        let err = store
            .load_result(&RunId::from_ulid(Ulid::nil()), &EffectId::task(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn results_are_write_once() {
        let store = InMemoryStore::new();
        let rec = header();
        let run_id = rec.metadata.run_id;
        store.create_run(&rec).await.unwrap();

        let eid = EffectId::task(1);
        store.put_result(&run_id, &eid, &json!({"ok": 1})).await.unwrap();
        store.put_result(&run_id, &eid, &json!({"ok": 1})).await.unwrap();
        let err = store
            .put_result(&run_id, &eid, &json!({"ok": 2}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(
            store.load_result(&run_id, &eid).await.unwrap(),
            Some(json!({"ok": 1}))
        );
    }

    #[tokio::test]
    async fn journal_seq_starts_at_one() {
        let store = InMemoryStore::new();
        let rec = header();
        let run_id = rec.metadata.run_id;
        store.create_run(&rec).await.unwrap();

        let at = rec.metadata.timestamp;
        let e1 = store
            .append_event(&run_id, JournalEvent::RunCreated { process_id: "audit".into() }, at)
            .await
            .unwrap();
        let e2 = store
            .append_event(&run_id, JournalEvent::RunFailed { code: "x".into(), message: "y".into() }, at)
            .await
            .unwrap();
        assert_eq!((e1.seq, e2.seq), (1, 2));
        assert_eq!(store.read_journal(&run_id).await.unwrap().len(), 2);
    }
}
