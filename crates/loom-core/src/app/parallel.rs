//! Parallel combinator: fan-out / join with a group-scoped failure flag.
//!
//! Every branch runs inside a `tokio::task_local!` scope that carries
//!
//! - the failure flags of all enclosing groups: when a branch fails, its
//!   group's flag trips and tasks a branch creates afterwards fail with
//!   `Cancelled` before the delegate is invoked. Tasks submitted with the join
//!   (the calls handed to `Parallel::all` and the first task of each branch)
//!   always run, so siblings of a failed branch stay persisted no matter
//!   which branch is polled first;
//! - an id allocator: tasks, gates and nested groups created while a branch
//!   runs get ids under the branch prefix (`g0001.2.t0001`), so ids never
//!   depend on which branch happens to finish first;
//! - an artifact buffer: artifacts emitted inside a branch are held back and
//!   flushed branch by branch in submission order once the join completes.
//!
//! The join waits for every branch, then reports the first non-`Cancelled`
//! error in submission order.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tracing::debug;

use crate::app::aggregator::ArtifactAggregator;
use crate::domain::errors::{ErrorKind, LoomError};
use crate::domain::ids::{BreakpointId, EffectId};
use crate::domain::outcome::Artifact;

/// Sequential id allocation for one scope (the run root or one branch).
#[derive(Debug, Clone, Default)]
pub struct IdScope {
    prefix: String,
    tasks: Arc<AtomicU64>,
    gates: Arc<AtomicU64>,
    groups: Arc<AtomicU64>,
}

impl IdScope {
    pub fn root() -> Self {
        Self::default()
    }

    fn branch(prefix: String) -> Self {
        Self {
            prefix,
            ..Self::default()
        }
    }

    pub fn next_task(&self) -> EffectId {
        EffectId::scoped(&self.prefix, self.tasks.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn next_gate(&self) -> BreakpointId {
        BreakpointId::scoped(&self.prefix, self.gates.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn next_group(&self) -> String {
        let seq = self.groups.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}g{seq:04}", self.prefix)
    }
}

type Sink = Arc<Mutex<Vec<Artifact>>>;

#[derive(Clone)]
struct GroupScope {
    flags: Vec<Arc<AtomicBool>>,
    ids: IdScope,
    sink: Sink,
    opened: Arc<AtomicBool>,
}

/// Failure flags a task is bound to, captured when the task is created.
#[derive(Debug, Clone, Default)]
pub struct GroupFence {
    flags: Vec<Arc<AtomicBool>>,
}

impl GroupFence {
    /// Never trips.
    pub fn none() -> Self {
        Self::default()
    }

    /// Fence for a task created now.
    ///
    /// Outside any group the fence is empty. The first task of a branch is
    /// bound only to the enclosing groups, not to its own.
    pub fn current() -> Self {
        let flags = GROUP
            .try_with(|g| {
                if g.opened.swap(true, Ordering::SeqCst) {
                    g.flags.clone()
                } else {
                    g.flags[..g.flags.len().saturating_sub(1)].to_vec()
                }
            })
            .unwrap_or_default();
        Self { flags }
    }

    pub fn tripped(&self) -> bool {
        self.flags.iter().any(|f| f.load(Ordering::SeqCst))
    }
}

tokio::task_local! {
    static GROUP: GroupScope;
}

/// The allocator for the current scope: the innermost branch, else `root`.
pub fn id_scope(root: &IdScope) -> IdScope {
    GROUP
        .try_with(|g| g.ids.clone())
        .unwrap_or_else(|_| root.clone())
}

/// Route artifacts to the innermost branch buffer, else to the aggregator.
pub fn emit(aggregator: &ArtifactAggregator, artifacts: &[Artifact]) {
    if artifacts.is_empty() {
        return;
    }
    let buffered = GROUP.try_with(|g| {
        g.sink
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(artifacts);
    });
    if buffered.is_err() {
        aggregator.append(artifacts);
    }
}

/// Drive every branch concurrently; results come back in submission order.
pub async fn join<T, F>(
    aggregator: &ArtifactAggregator,
    root: &IdScope,
    branches: Vec<F>,
) -> Result<Vec<T>, LoomError>
where
    F: Future<Output = Result<T, LoomError>>,
{
    let parent_flags = GROUP.try_with(|g| g.flags.clone()).unwrap_or_default();
    let group = id_scope(root).next_group();
    let tripped = Arc::new(AtomicBool::new(false));

    let mut sinks: Vec<Sink> = Vec::with_capacity(branches.len());
    let scoped: Vec<_> = branches
        .into_iter()
        .enumerate()
        .map(|(index, branch)| {
            let mut flags = parent_flags.clone();
            flags.push(tripped.clone());
            let sink = Sink::default();
            sinks.push(sink.clone());
            let scope = GroupScope {
                flags,
                ids: IdScope::branch(format!("{group}.{}.", index + 1)),
                sink,
                opened: Arc::new(AtomicBool::new(false)),
            };
            let tripped = tripped.clone();
            let group = group.clone();
            GROUP.scope(scope, async move {
                let out = branch.await;
                if let Err(err) = &out
                    && err.kind() != ErrorKind::Control
                {
                    debug!(%group, branch = index + 1, code = err.code(), "parallel branch failed; tripping group");
                    tripped.store(true, Ordering::SeqCst);
                }
                out
            })
        })
        .collect();
    let outcomes = join_all(scoped).await;

    for sink in sinks {
        let artifacts = std::mem::take(&mut *sink.lock().unwrap_or_else(|e| e.into_inner()));
        emit(aggregator, &artifacts);
    }

    let mut values = Vec::with_capacity(outcomes.len());
    let mut cancelled = false;
    let mut first_error = None;
    for outcome in outcomes {
        match outcome {
            Ok(v) => values.push(v),
            Err(LoomError::Cancelled) => cancelled = true,
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None if cancelled => Err(LoomError::Cancelled),
        None => Ok(values),
    }
}
