//! Scheduler - 1 回のタスク呼び出しを実行する
//!
//! # 処理の流れ（EffectId ごとの async mutex の内側）
//! 1. request ドキュメントがあれば fingerprint を比較（不一致は ReplayInconsistency）
//! 2. result ドキュメントがあれば再検証して返す（delegate は呼ばない）
//! 3. キャンセル済み（run 全体か、失敗した並列グループ）なら Cancelled、
//!    そうでなければ request を保存
//! 4. リトライ方針に従って delegate を呼ぶ（attempt ごとに timeout）
//! 5. text 返信は repair して parse、shape で検証（失敗は error.json へ）
//! 6. result を write-once で保存して返す

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, watch};
use tracing::{debug, info, warn};

use crate::app::parallel::GroupFence;
use crate::app::repair::parse_reply;
use crate::app::retry::RetryPolicy;
use crate::domain::attempt::{AttemptOutcome, AttemptRecord, FailureRecord};
use crate::domain::descriptor::TaskDescriptor;
use crate::domain::errors::{DelegateError, DelegateFailure, LoomError};
use crate::domain::events::JournalEvent;
use crate::domain::ids::{EffectId, RunId};
use crate::domain::outcome::TaskResult;
use crate::domain::shape::ValidationError;
use crate::ports::{Clock, Delegate, DelegateReply, DelegateRequest, EffectStore, RequestRecord};

pub struct Scheduler {
    run_id: RunId,
    store: Arc<dyn EffectStore>,
    delegate: Arc<dyn Delegate>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    cancel: watch::Receiver<bool>,
    locks: Mutex<HashMap<EffectId, Arc<AsyncMutex<()>>>>,
}

impl Scheduler {
    pub fn new(
        run_id: RunId,
        store: Arc<dyn EffectStore>,
        delegate: Arc<dyn Delegate>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            run_id,
            store,
            delegate,
            clock,
            retry,
            cancel,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, effect_id: &EffectId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(effect_id.clone()).or_default().clone()
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub async fn execute(
        &self,
        effect_id: &EffectId,
        descriptor: &TaskDescriptor,
    ) -> Result<TaskResult, LoomError> {
        self.execute_fenced(effect_id, descriptor, &GroupFence::none())
            .await
    }

    /// Like [`execute`](Self::execute), but also skipped once `fence` trips.
    pub async fn execute_fenced(
        &self,
        effect_id: &EffectId,
        descriptor: &TaskDescriptor,
        fence: &GroupFence,
    ) -> Result<TaskResult, LoomError> {
        let lock = self.lock_for(effect_id);
        let _guard = lock.lock().await;

        let shape = &descriptor.delegate().result_shape;
        let fingerprint = descriptor.fingerprint();

        let requested = self.store.load_request(&self.run_id, effect_id).await?;
        if let Some(existing) = &requested
            && existing.fingerprint != fingerprint
        {
            warn!(
                run_id = %self.run_id,
                effect_id = %effect_id,
                persisted = %existing.fingerprint,
                rebuilt = %fingerprint,
                "descriptor changed since the effect was recorded"
            );
            return Err(LoomError::ReplayInconsistency {
                effect_id: effect_id.clone(),
                expected: fingerprint,
                found: existing.fingerprint.clone(),
            });
        }

        if let Some(raw) = self.store.load_result(&self.run_id, effect_id).await? {
            debug!(run_id = %self.run_id, effect_id = %effect_id, "replaying recorded result");
            return Ok(TaskResult::from_reply(effect_id, shape, raw)?);
        }

        if self.is_cancelled() || fence.tripped() {
            debug!(run_id = %self.run_id, effect_id = %effect_id, "skipping task: cancelled");
            return Err(LoomError::Cancelled);
        }

        if requested.is_none() {
            let record = RequestRecord::new(effect_id.clone(), descriptor.clone(), self.clock.now());
            self.store.put_request(&self.run_id, &record).await?;
            self.journal(JournalEvent::EffectRequested {
                effect_id: effect_id.clone(),
                kind: descriptor.kind(),
                title: descriptor.title().to_string(),
                delegate: descriptor.delegate().name.clone(),
                fingerprint: fingerprint.clone(),
            })
            .await?;
        }

        let (reply, attempts) = self.invoke(effect_id, descriptor).await?;
        let attempt_count = attempts.len() as u32;

        let value = match reply {
            DelegateReply::Structured(value) => Ok(value),
            DelegateReply::Text(text) => parse_reply(&text),
        };
        let validated = value
            .map_err(|e| e.for_effect(effect_id.clone()))
            .and_then(|value| TaskResult::from_reply(effect_id, shape, value));

        let result = match validated {
            Ok(result) => result,
            Err(err) => {
                self.record_validation_failure(&err, attempts).await?;
                return Err(err.into());
            }
        };

        self.store
            .put_result(&self.run_id, effect_id, &result.to_value())
            .await?;
        self.journal(JournalEvent::EffectResolved {
            effect_id: effect_id.clone(),
            attempts: attempt_count,
            artifact_count: result.artifacts().len(),
        })
        .await?;
        info!(
            run_id = %self.run_id,
            effect_id = %effect_id,
            title = descriptor.title(),
            attempts = attempt_count,
            artifacts = result.artifacts().len(),
            "task resolved"
        );
        Ok(result)
    }

    /// Call the delegate under the retry policy.
    async fn invoke(
        &self,
        effect_id: &EffectId,
        descriptor: &TaskDescriptor,
    ) -> Result<(DelegateReply, Vec<AttemptRecord>), LoomError> {
        let name = &descriptor.delegate().name;
        let request = DelegateRequest::for_descriptor(self.run_id, effect_id.clone(), descriptor);
        let mut attempts: Vec<AttemptRecord> = Vec::new();

        loop {
            let attempt = attempts.len() as u32 + 1;
            let started_at = self.clock.now();
            let outcome = tokio::time::timeout(
                self.retry.timeout,
                self.delegate.invoke(name, &request),
            )
            .await
            .unwrap_or_else(|_| {
                Err(DelegateError::timeout(format!(
                    "no reply within {}s",
                    self.retry.timeout.as_secs_f64()
                )))
            });
            let finished_at = self.clock.now();

            match outcome {
                Ok(reply) => {
                    attempts.push(AttemptRecord {
                        attempt,
                        started_at,
                        finished_at,
                        outcome: AttemptOutcome::Replied,
                    });
                    return Ok((reply, attempts));
                }
                Err(err) => {
                    attempts.push(AttemptRecord {
                        attempt,
                        started_at,
                        finished_at,
                        outcome: AttemptOutcome::Failed {
                            kind: err.kind,
                            message: err.message.clone(),
                        },
                    });

                    if !self.retry.should_retry(err.kind, attempt) {
                        return Err(self.record_delegate_failure(effect_id, descriptor, err, attempts).await);
                    }

                    let delay = self.retry.next_delay(attempt);
                    warn!(
                        run_id = %self.run_id,
                        effect_id = %effect_id,
                        delegate = %name,
                        attempt,
                        kind = ?err.kind,
                        delay_ms = delay.as_millis() as u64,
                        "delegate call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    if *self.cancel.borrow() {
                        return Err(LoomError::Cancelled);
                    }
                }
            }
        }
    }

    async fn record_delegate_failure(
        &self,
        effect_id: &EffectId,
        descriptor: &TaskDescriptor,
        err: DelegateError,
        attempts: Vec<AttemptRecord>,
    ) -> LoomError {
        let failure = DelegateFailure {
            effect_id: effect_id.clone(),
            delegate: descriptor.delegate().name.clone(),
            kind: err.kind,
            message: err.message,
            attempts: attempts.len() as u32,
        };
        let error = LoomError::Delegate(failure);
        let record = FailureRecord {
            effect_id: effect_id.clone(),
            code: error.code().to_string(),
            message: error.to_string(),
            violations: Vec::new(),
            raw: None,
            attempts,
        };
        if let Err(store_err) = self.persist_failure(record).await {
            return store_err;
        }
        warn!(run_id = %self.run_id, effect_id = %effect_id, error = %error, "task failed");
        error
    }

    async fn record_validation_failure(
        &self,
        err: &ValidationError,
        attempts: Vec<AttemptRecord>,
    ) -> Result<(), LoomError> {
        let effect_id = err
            .effect_id
            .clone()
            .ok_or_else(|| LoomError::InvalidInput("validation error without effect id".into()))?;
        let record = FailureRecord {
            effect_id: effect_id.clone(),
            code: "validation_error".to_string(),
            message: err.to_string(),
            violations: err.violations.clone(),
            raw: Some(err.raw.clone()),
            attempts,
        };
        self.persist_failure(record).await?;
        warn!(
            run_id = %self.run_id,
            effect_id = %effect_id,
            violations = err.violations.len(),
            error = %err,
            "reply rejected by result shape"
        );
        Ok(())
    }

    async fn persist_failure(&self, record: FailureRecord) -> Result<(), LoomError> {
        self.store.put_failure(&self.run_id, &record).await?;
        let attempts = record.attempts.len() as u32;
        self.journal(JournalEvent::EffectFailed {
            effect_id: record.effect_id,
            attempts,
            code: record.code,
            message: record.message,
        })
        .await
    }

    async fn journal(&self, event: JournalEvent) -> Result<(), LoomError> {
        self.store
            .append_event(&self.run_id, event, self.clock.now())
            .await?;
        Ok(())
    }
}
