//! ExecutionContext - process 定義から見た唯一の窓口
//!
//! process は外部世界に ctx 経由でしか触れません（時刻・ログ・タスク・並列・
//! breakpoint・成果物）。同じ記録済みの結果と決定が与えられれば、
//! ctx のすべての操作は同じ結果を返します。

use std::future::IntoFuture;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::{Level, debug, error, info, trace, warn};

use crate::app::aggregator::ArtifactAggregator;
use crate::app::gate::{BreakpointManager, GatePredicate, GateStatus};
use crate::app::parallel::{self, GroupFence, IdScope};
use crate::app::scheduler::Scheduler;
use crate::domain::breakpoint::BreakpointSpec;
use crate::domain::decision::Decision;
use crate::domain::descriptor::{TaskContext, TaskDescriptor, TaskFactory, TaskIo};
use crate::domain::envelope::{ResultEnvelope, RunMetadata, RunRecord};
use crate::domain::errors::LoomError;
use crate::domain::ids::{BreakpointId, EffectId, RunId};
use crate::domain::outcome::TaskResult;
use crate::domain::spec::ProcessOptions;
use crate::ports::Clock;

pub struct ExecutionContext {
    record: RunRecord,
    scheduler: Scheduler,
    gates: BreakpointManager,
    aggregator: ArtifactAggregator,
    clock: Arc<dyn Clock>,
    ids: IdScope,
    started_at: DateTime<Utc>,
    last_now: Mutex<DateTime<Utc>>,
}

impl ExecutionContext {
    pub fn new(
        record: RunRecord,
        scheduler: Scheduler,
        gates: BreakpointManager,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let started_at = clock.now();
        Self {
            record,
            scheduler,
            gates,
            aggregator: ArtifactAggregator::new(),
            clock,
            ids: IdScope::root(),
            started_at,
            last_now: Mutex::new(started_at),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.record.metadata.run_id
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.record.metadata
    }

    pub fn inputs(&self) -> &Value {
        &self.record.inputs
    }

    pub fn options(&self) -> &ProcessOptions {
        &self.record.options
    }

    pub fn artifacts(&self) -> &ArtifactAggregator {
        &self.aggregator
    }

    /// When this execution (not the run) began.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current time; never goes backwards within one execution.
    pub fn now(&self) -> DateTime<Utc> {
        let sample = self.clock.now();
        let mut last = self.last_now.lock().unwrap_or_else(|e| e.into_inner());
        if sample > *last {
            *last = sample;
        }
        *last
    }

    /// Best-effort log line tagged with the run.
    pub fn log(&self, level: Level, message: impl AsRef<str>) {
        let message = message.as_ref();
        let run_id = self.record.metadata.run_id;
        let process_id = self.record.metadata.process_id.as_str();
        if level == Level::ERROR {
            error!(run_id = %run_id, process_id, "{message}");
        } else if level == Level::WARN {
            warn!(run_id = %run_id, process_id, "{message}");
        } else if level == Level::INFO {
            info!(run_id = %run_id, process_id, "{message}");
        } else if level == Level::DEBUG {
            debug!(run_id = %run_id, process_id, "{message}");
        } else {
            trace!(run_id = %run_id, process_id, "{message}");
        }
    }

    /// Build a task invocation. The effect id is allocated here, not when the
    /// returned call is first awaited, and so is the parallel-group fence.
    pub fn task<F>(&self, factory: &F, args: &Value) -> TaskCall<'_>
    where
        F: TaskFactory + ?Sized,
    {
        let effect_id = parallel::id_scope(&self.ids).next_task();
        let task_ctx = TaskContext {
            run_id: self.record.metadata.run_id,
            process_id: self.record.metadata.process_id.clone(),
            io: TaskIo::for_effect(&effect_id),
            effect_id: effect_id.clone(),
        };
        let descriptor = factory.build(args, &task_ctx);
        TaskCall {
            ctx: self,
            effect_id,
            descriptor,
            fence: GroupFence::current(),
        }
    }

    pub fn parallel(&self) -> Parallel<'_> {
        Parallel { ctx: self }
    }

    /// Raise a breakpoint and wait for its decision.
    ///
    /// A decision already on record is returned as is. Without one, the run
    /// suspends (`LoomError::Suspended`) until the breakpoint is resolved and
    /// the run resumed. Rejections come back as a `Decision`; use
    /// [`approval`](Self::approval) for a blocking gate.
    pub async fn breakpoint(&self, spec: BreakpointSpec) -> Result<Decision, LoomError> {
        let breakpoint_id = parallel::id_scope(&self.ids).next_gate();
        self.decide(breakpoint_id, spec).await
    }

    /// A blocking breakpoint: a rejection stops the run with
    /// `LoomError::GateRejected`.
    pub async fn approval(&self, spec: BreakpointSpec) -> Result<Decision, LoomError> {
        let breakpoint_id = parallel::id_scope(&self.ids).next_gate();
        self.decide(breakpoint_id.clone(), spec)
            .await?
            .require_approval(&breakpoint_id)
    }

    async fn decide(
        &self,
        breakpoint_id: BreakpointId,
        spec: BreakpointSpec,
    ) -> Result<Decision, LoomError> {
        match self.gates.raise(&self.run_id(), &breakpoint_id, spec).await? {
            GateStatus::Decided(decision) => Ok(decision),
            GateStatus::Pending(_) => Err(LoomError::Suspended { breakpoint_id }),
        }
    }

    /// Raise a breakpoint only when `predicate` holds for `input`.
    pub async fn breakpoint_if<P, I, S>(
        &self,
        predicate: &P,
        input: &I,
        spec: S,
    ) -> Result<Option<Decision>, LoomError>
    where
        P: GatePredicate<I> + ?Sized,
        I: ?Sized,
        S: FnOnce() -> BreakpointSpec,
    {
        if !predicate.should_raise(input) {
            return Ok(None);
        }
        self.breakpoint(spec()).await.map(Some)
    }

    /// Produce the run's envelope. Can be called once.
    ///
    /// `fields` must be a JSON object (or null for none); its keys are
    /// flattened next to `success`, `artifacts`, `duration_ms` and `metadata`.
    pub fn finish(
        &self,
        started_at: DateTime<Utc>,
        success: bool,
        fields: Value,
    ) -> Result<ResultEnvelope, LoomError> {
        let fields = match fields {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(LoomError::InvalidInput(format!(
                    "envelope fields must be an object, got {other}"
                )));
            }
        };
        let duration_ms = (self.now() - started_at).num_milliseconds().max(0) as u64;
        self.aggregator
            .finalize(success, fields, self.record.metadata.clone(), duration_ms)
    }

    /// Envelope for a run that stopped on `err`, carrying what was collected.
    pub(crate) fn failure_envelope(&self, err: &LoomError) -> ResultEnvelope {
        let mut fields = Map::new();
        let mut detail = Map::new();
        detail.insert("code".into(), Value::from(err.code()));
        detail.insert("message".into(), Value::from(err.to_string()));
        if let Some(effect_id) = failed_effect(err) {
            detail.insert("effect_id".into(), Value::from(effect_id.as_str()));
        }
        fields.insert("error".into(), Value::Object(detail));

        let duration_ms = (self.now() - self.started_at).num_milliseconds().max(0) as u64;
        ResultEnvelope {
            success: false,
            fields,
            artifacts: self.aggregator.snapshot(),
            duration_ms,
            metadata: self.record.metadata.clone(),
        }
    }
}

fn failed_effect(err: &LoomError) -> Option<&EffectId> {
    match err {
        LoomError::Validation(v) => v.effect_id.as_ref(),
        LoomError::Delegate(f) => Some(&f.effect_id),
        LoomError::ReplayInconsistency { effect_id, .. } => Some(effect_id),
        _ => None,
    }
}

/// One pending task invocation.
///
/// Awaiting it runs the task and appends its artifacts to the run; inside
/// [`Parallel::all`] artifacts are appended in submission order instead.
pub struct TaskCall<'a> {
    ctx: &'a ExecutionContext,
    effect_id: EffectId,
    descriptor: TaskDescriptor,
    fence: GroupFence,
}

impl TaskCall<'_> {
    pub fn effect_id(&self) -> &EffectId {
        &self.effect_id
    }

    pub fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }
}

impl<'a> IntoFuture for TaskCall<'a> {
    type Output = Result<TaskResult, LoomError>;
    type IntoFuture = BoxFuture<'a, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let ctx = self.ctx;
            let result = ctx
                .scheduler
                .execute_fenced(&self.effect_id, &self.descriptor, &self.fence)
                .await?;
            parallel::emit(&ctx.aggregator, result.artifacts());
            Ok(result)
        })
    }
}

pub struct Parallel<'a> {
    ctx: &'a ExecutionContext,
}

impl<'a> Parallel<'a> {
    /// Run independent tasks concurrently; results in submission order.
    pub async fn all(&self, calls: Vec<TaskCall<'a>>) -> Result<Vec<TaskResult>, LoomError> {
        let branches: Vec<_> = calls.into_iter().map(IntoFuture::into_future).collect();
        self.join(branches).await
    }

    /// Run arbitrary multi-step branches concurrently.
    pub async fn join<T, F>(&self, branches: Vec<F>) -> Result<Vec<T>, LoomError>
    where
        F: std::future::Future<Output = Result<T, LoomError>>,
    {
        parallel::join(&self.ctx.aggregator, &self.ctx.ids, branches).await
    }
}
