//! EffectStore port - run ごとの永続ストア（正本）
//!
//! 1 run = 1 パーティション。run 間で共有されるのはストアそのものだけです。
//!
//! # 保存するもの
//! - run ヘッダ（RunRecord）
//! - effect ごとの request / result / error ドキュメント
//! - breakpoint レコード
//! - journal（追記専用）
//! - 最終 ResultEnvelope
//!
//! # 不変条件
//! - result は write-once: 同じ EffectId に異なる result を書こうとすると `Conflict`
//! - journal の seq はストアが 1 から採番

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::attempt::FailureRecord;
use crate::domain::breakpoint::BreakpointRecord;
use crate::domain::descriptor::TaskDescriptor;
use crate::domain::envelope::{ResultEnvelope, RunRecord};
use crate::domain::errors::StoreError;
use crate::domain::events::{JournalEntry, JournalEvent};
use crate::domain::ids::{BreakpointId, EffectId, RunId};

/// The request document persisted before a delegate is invoked
/// (`tasks/<effect_id>/input.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub effect_id: EffectId,
    pub fingerprint: String,
    pub descriptor: TaskDescriptor,
    pub requested_at: DateTime<Utc>,
}

impl RequestRecord {
    pub fn new(effect_id: EffectId, descriptor: TaskDescriptor, requested_at: DateTime<Utc>) -> Self {
        Self {
            effect_id,
            fingerprint: descriptor.fingerprint(),
            descriptor,
            requested_at,
        }
    }
}

#[async_trait]
pub trait EffectStore: Send + Sync {
    /// Fails with `RunExists` when the run was already created.
    async fn create_run(&self, record: &RunRecord) -> Result<(), StoreError>;

    async fn load_run(&self, run_id: &RunId) -> Result<RunRecord, StoreError>;

    async fn list_runs(&self) -> Result<Vec<RunId>, StoreError>;

    async fn load_request(
        &self,
        run_id: &RunId,
        effect_id: &EffectId,
    ) -> Result<Option<RequestRecord>, StoreError>;

    async fn put_request(&self, run_id: &RunId, request: &RequestRecord) -> Result<(), StoreError>;

    async fn load_result(
        &self,
        run_id: &RunId,
        effect_id: &EffectId,
    ) -> Result<Option<Value>, StoreError>;

    /// Write-once. Writing an identical document again is a no-op.
    async fn put_result(
        &self,
        run_id: &RunId,
        effect_id: &EffectId,
        result: &Value,
    ) -> Result<(), StoreError>;

    async fn put_failure(&self, run_id: &RunId, failure: &FailureRecord) -> Result<(), StoreError>;

    async fn load_failure(
        &self,
        run_id: &RunId,
        effect_id: &EffectId,
    ) -> Result<Option<FailureRecord>, StoreError>;

    async fn load_breakpoint(
        &self,
        run_id: &RunId,
        breakpoint_id: &BreakpointId,
    ) -> Result<Option<BreakpointRecord>, StoreError>;

    async fn put_breakpoint(
        &self,
        run_id: &RunId,
        record: &BreakpointRecord,
    ) -> Result<(), StoreError>;

    /// Ordered by breakpoint id.
    async fn list_breakpoints(&self, run_id: &RunId) -> Result<Vec<BreakpointRecord>, StoreError>;

    async fn append_event(
        &self,
        run_id: &RunId,
        event: JournalEvent,
        recorded_at: DateTime<Utc>,
    ) -> Result<JournalEntry, StoreError>;

    async fn read_journal(&self, run_id: &RunId) -> Result<Vec<JournalEntry>, StoreError>;

    async fn put_output(&self, run_id: &RunId, envelope: &ResultEnvelope) -> Result<(), StoreError>;

    async fn load_output(&self, run_id: &RunId) -> Result<Option<ResultEnvelope>, StoreError>;
}
