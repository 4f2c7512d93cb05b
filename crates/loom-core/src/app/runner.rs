//! ProcessRunner - run の開始・再開・breakpoint 解決の入口
//!
//! # run のライフサイクル
//! ```text
//! start ──▶ run.json + RUN_CREATED ──▶ process.run(ctx)
//!   Ok(envelope)        → output.json + RUN_COMPLETED        → Completed
//!   Err(Suspended)      → RUN_SUSPENDED                      → Suspended（resolve 後に resume）
//!   Err(Cancelled)      → RUN_CANCELLED                      → Cancelled（resume 可）
//!   Err(Store)          → そのまま返す（未確定、resume 可）
//!   Err(その他)         → success:false の envelope + RUN_FAILED → Completed
//! ```
//!
//! resume は process を先頭から再実行します。記録済みの effect と決定済みの
//! breakpoint は記録された値をそのまま返すので、delegate は再度呼ばれません。

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{Instrument, info, info_span, warn};

use crate::app::context::ExecutionContext;
use crate::app::gate::BreakpointManager;
use crate::app::process::{Process, ProcessRegistry};
use crate::app::retry::RetryPolicy;
use crate::app::scheduler::Scheduler;
use crate::app::status::{RunSummary, summarize};
use crate::domain::breakpoint::BreakpointRecord;
use crate::domain::decision::Decision;
use crate::domain::envelope::{ResultEnvelope, RunMetadata, RunRecord};
use crate::domain::errors::{ErrorKind, LoomError};
use crate::domain::events::{JournalEntry, JournalEvent};
use crate::domain::ids::{BreakpointId, RunId};
use crate::domain::spec::ProcessOptions;
use crate::ports::{Clock, Delegate, EffectStore, IdGenerator, ReviewerChannel};

#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// Finished, successfully or as a controlled failure (`success: false`).
    Completed(ResultEnvelope),
    /// Waiting on a breakpoint.
    Suspended {
        run_id: RunId,
        breakpoint_id: BreakpointId,
        pending: Vec<BreakpointRecord>,
    },
    /// Stopped by the cancel handle; not finalized.
    Cancelled { run_id: RunId },
}

impl RunStatus {
    pub fn run_id(&self) -> RunId {
        match self {
            RunStatus::Completed(envelope) => envelope.metadata.run_id,
            RunStatus::Suspended { run_id, .. } | RunStatus::Cancelled { run_id } => *run_id,
        }
    }

    pub fn envelope(&self) -> Option<&ResultEnvelope> {
        match self {
            RunStatus::Completed(envelope) => Some(envelope),
            _ => None,
        }
    }

    pub fn into_envelope(self) -> Option<ResultEnvelope> {
        match self {
            RunStatus::Completed(envelope) => Some(envelope),
            _ => None,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, RunStatus::Suspended { .. })
    }
}

/// Cancels every run the runner is executing. New runs started while the
/// flag is set are cancelled before their first delegate call.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

pub struct ProcessRunner {
    pub(crate) store: Arc<dyn EffectStore>,
    pub(crate) delegate: Arc<dyn Delegate>,
    pub(crate) reviewer: Arc<dyn ReviewerChannel>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) retry: RetryPolicy,
    pub(crate) defaults: ProcessOptions,
    pub(crate) registry: ProcessRegistry,
    pub(crate) cancel: Arc<watch::Sender<bool>>,
}

impl ProcessRunner {
    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn EffectStore> {
        &self.store
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel.clone(),
        }
    }

    fn gates(&self) -> BreakpointManager {
        BreakpointManager::new(self.store.clone(), self.reviewer.clone(), self.clock.clone())
    }

    /// Create a run and execute it.
    pub async fn start(
        &self,
        process: &dyn Process,
        inputs: Value,
        options: Option<ProcessOptions>,
    ) -> Result<RunStatus, LoomError> {
        let run_id = self.ids.generate_run_id();
        let record = RunRecord {
            metadata: RunMetadata {
                run_id,
                process_id: process.id().to_string(),
                timestamp: self.clock.now(),
            },
            inputs,
            options: options.unwrap_or_else(|| self.defaults.clone()),
        };
        self.store.create_run(&record).await?;
        self.journal_event(
            &run_id,
            JournalEvent::RunCreated {
                process_id: record.metadata.process_id.clone(),
            },
        )
        .await?;
        info!(run_id = %run_id, process_id = process.id(), "run created");
        self.execute(process, record).await
    }

    /// Start a run of a registered process.
    pub async fn start_registered(
        &self,
        process_id: &str,
        inputs: Value,
        options: Option<ProcessOptions>,
    ) -> Result<RunStatus, LoomError> {
        let process = self.lookup(process_id)?;
        self.start(process.as_ref(), inputs, options).await
    }

    /// Replay a run from the top. A finalized run returns its stored envelope.
    pub async fn resume(&self, process: &dyn Process, run_id: &RunId) -> Result<RunStatus, LoomError> {
        let record = self.store.load_run(run_id).await?;
        if record.metadata.process_id != process.id() {
            return Err(LoomError::InvalidInput(format!(
                "run {run_id} belongs to process `{}`, not `{}`",
                record.metadata.process_id,
                process.id()
            )));
        }
        if let Some(envelope) = self.store.load_output(run_id).await? {
            info!(run_id = %run_id, "run already finalized; returning stored envelope");
            return Ok(RunStatus::Completed(envelope));
        }
        info!(run_id = %run_id, process_id = process.id(), "resuming run");
        self.execute(process, record).await
    }

    /// Resume a run using the process recorded in its header.
    pub async fn resume_registered(&self, run_id: &RunId) -> Result<RunStatus, LoomError> {
        let record = self.store.load_run(run_id).await?;
        let process = self.lookup(&record.metadata.process_id)?;
        self.resume(process.as_ref(), run_id).await
    }

    pub async fn resolve(
        &self,
        run_id: &RunId,
        breakpoint_id: &BreakpointId,
        decision: Decision,
    ) -> Result<BreakpointRecord, LoomError> {
        self.gates().resolve(run_id, breakpoint_id, decision).await
    }

    pub async fn escalate(
        &self,
        run_id: &RunId,
        breakpoint_id: &BreakpointId,
        audience: &str,
    ) -> Result<BreakpointRecord, LoomError> {
        self.gates().escalate(run_id, breakpoint_id, audience).await
    }

    pub async fn pending(&self, run_id: &RunId) -> Result<Vec<BreakpointRecord>, LoomError> {
        self.gates().pending(run_id).await
    }

    pub async fn journal(&self, run_id: &RunId) -> Result<Vec<JournalEntry>, LoomError> {
        Ok(self.store.read_journal(run_id).await?)
    }

    pub async fn status(&self, run_id: &RunId) -> Result<RunSummary, LoomError> {
        let record = self.store.load_run(run_id).await?;
        let journal = self.store.read_journal(run_id).await?;
        let pending = self.pending(run_id).await?;
        Ok(summarize(&record, &journal, &pending))
    }

    pub async fn runs(&self) -> Result<Vec<RunId>, LoomError> {
        Ok(self.store.list_runs().await?)
    }

    fn lookup(&self, process_id: &str) -> Result<Arc<dyn Process>, LoomError> {
        self.registry.get(process_id).ok_or_else(|| {
            LoomError::InvalidInput(format!("unknown process `{process_id}`"))
        })
    }

    async fn execute(&self, process: &dyn Process, record: RunRecord) -> Result<RunStatus, LoomError> {
        let run_id = record.metadata.run_id;
        let scheduler = Scheduler::new(
            run_id,
            self.store.clone(),
            self.delegate.clone(),
            self.clock.clone(),
            self.retry.clone(),
            self.cancel.subscribe(),
        );
        let ctx = ExecutionContext::new(record, scheduler, self.gates(), self.clock.clone());

        let span = info_span!("run", run_id = %run_id, process_id = process.id());
        let outcome = process.run(&ctx).instrument(span).await;

        match outcome {
            Ok(envelope) => {
                self.finalize(&run_id, &envelope).await?;
                self.journal_event(
                    &run_id,
                    JournalEvent::RunCompleted {
                        success: envelope.success,
                        artifact_count: envelope.artifacts.len(),
                    },
                )
                .await?;
                info!(
                    run_id = %run_id,
                    success = envelope.success,
                    artifacts = envelope.artifacts.len(),
                    duration_ms = envelope.duration_ms,
                    "run completed"
                );
                Ok(RunStatus::Completed(envelope))
            }
            Err(LoomError::Suspended { breakpoint_id }) => {
                self.journal_event(
                    &run_id,
                    JournalEvent::RunSuspended {
                        breakpoint_id: breakpoint_id.clone(),
                    },
                )
                .await?;
                let pending = self.pending(&run_id).await?;
                info!(run_id = %run_id, breakpoint_id = %breakpoint_id, "run suspended at breakpoint");
                Ok(RunStatus::Suspended {
                    run_id,
                    breakpoint_id,
                    pending,
                })
            }
            Err(LoomError::Cancelled) => {
                self.journal_event(&run_id, JournalEvent::RunCancelled).await?;
                warn!(run_id = %run_id, "run cancelled");
                Ok(RunStatus::Cancelled { run_id })
            }
            Err(err) if err.kind() == ErrorKind::Infrastructure => {
                warn!(run_id = %run_id, error = %err, "run interrupted by a store error; it can be resumed");
                Err(err)
            }
            Err(err) => {
                let envelope = ctx.failure_envelope(&err);
                self.finalize(&run_id, &envelope).await?;
                self.journal_event(
                    &run_id,
                    JournalEvent::RunFailed {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    },
                )
                .await?;
                warn!(run_id = %run_id, code = err.code(), error = %err, "run failed");
                Ok(RunStatus::Completed(envelope))
            }
        }
    }

    async fn finalize(&self, run_id: &RunId, envelope: &ResultEnvelope) -> Result<(), LoomError> {
        Ok(self.store.put_output(run_id, envelope).await?)
    }

    async fn journal_event(&self, run_id: &RunId, event: JournalEvent) -> Result<(), LoomError> {
        self.store
            .append_event(run_id, event, self.clock.now())
            .await?;
        Ok(())
    }
}
