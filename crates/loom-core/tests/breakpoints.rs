//! Breakpoint tests: conditional gates, suspend / resolve / resume, reviewers.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use common::{Audit, audit_delegate, critical_findings, runner};
use loom_core::app::{ExecutionContext, Process, RunPhase, RunStatus, RunnerBuilder};
use loom_core::domain::{
    BreakpointId, BreakpointSpec, Decision, GateState, LoomError, ResultEnvelope,
};
use loom_core::impls::{FsStore, InMemoryStore, PolicyReviewer};
use loom_core::ports::EffectStore;

#[tokio::test]
async fn gate_is_not_raised_without_critical_findings() {
    let delegate = audit_delegate(json!([{"severity": "high"}]));
    let store = Arc::new(InMemoryStore::new());
    let runner = runner(store.clone(), delegate.clone());

    let status = runner.start(&Audit, json!({"target": "src/"}), None).await.unwrap();
    let envelope = status.envelope().expect("completed");

    assert_eq!(envelope.field("fixed"), Some(&json!(true)));
    assert_eq!(envelope.field("patched"), Some(&json!(2)));
    assert!(store.list_breakpoints(&status.run_id()).await.unwrap().is_empty());
    assert_eq!(delegate.call_count("fixer"), 1);
}

#[tokio::test]
async fn critical_findings_suspend_until_resolved() {
    let delegate = audit_delegate(critical_findings());
    let runner = runner(Arc::new(InMemoryStore::new()), delegate.clone());

    let status = runner.start(&Audit, json!({"target": "src/"}), None).await.unwrap();
    let RunStatus::Suspended { run_id, breakpoint_id, pending } = status else {
        panic!("expected a suspended run");
    };
    assert_eq!(breakpoint_id, BreakpointId::gate(1));
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].breakpoint.context.fields["critical"], json!(1));
    assert_eq!(delegate.call_count("fixer"), 0);

    let summary = runner.status(&run_id).await.unwrap();
    assert_eq!(summary.phase, RunPhase::Suspended);
    assert_eq!(summary.pending_breakpoints, vec![breakpoint_id.clone()]);

    // resuming before a decision suspends at the same gate again
    let again = runner.resume(&Audit, &run_id).await.unwrap();
    assert!(again.is_suspended());
    assert_eq!(delegate.call_count("scanner"), 1);

    runner
        .resolve(&run_id, &breakpoint_id, Decision::approve().by("alice"))
        .await
        .unwrap();
    let done = runner.resume(&Audit, &run_id).await.unwrap();
    let envelope = done.envelope().expect("completed");
    assert_eq!(envelope.field("fixed"), Some(&json!(true)));
    assert_eq!(delegate.call_count("scanner"), 1);
    assert_eq!(delegate.call_count("fixer"), 1);
}

#[tokio::test]
async fn a_fresh_runner_resumes_from_the_filesystem() {
    let dir = tempfile::tempdir().expect("tempdir");

    let first_delegate = audit_delegate(critical_findings());
    let first = runner(Arc::new(FsStore::new(dir.path())), first_delegate.clone());
    let status = first.start(&Audit, json!({"target": "src/"}), None).await.unwrap();
    let run_id = status.run_id();
    assert!(status.is_suspended());
    drop(first);

    let second_delegate = audit_delegate(json!([]));
    let second = runner(Arc::new(FsStore::new(dir.path())), second_delegate.clone());
    let pending = second.pending(&run_id).await.unwrap();
    assert_eq!(pending.len(), 1);

    second
        .resolve(&run_id, &pending[0].id, Decision::approve())
        .await
        .unwrap();
    let done = second.resume_registered(&run_id).await.unwrap();
    let envelope = done.envelope().expect("completed");

    // the scan result comes from disk, not from the second delegate
    assert_eq!(envelope.field("critical"), Some(&json!(1)));
    assert_eq!(second_delegate.call_count("scanner"), 0);
    assert_eq!(second_delegate.call_count("fixer"), 1);
    assert_eq!(first_delegate.call_count("fixer"), 0);
}

#[tokio::test]
async fn rejected_gate_skips_the_fix() {
    let delegate = audit_delegate(critical_findings());
    let runner = runner(Arc::new(InMemoryStore::new()), delegate.clone());
    let status = runner.start(&Audit, json!({"target": "src/"}), None).await.unwrap();
    let run_id = status.run_id();

    runner
        .resolve(&run_id, &BreakpointId::gate(1), Decision::reject("too risky"))
        .await
        .unwrap();
    let done = runner.resume(&Audit, &run_id).await.unwrap();
    let envelope = done.envelope().expect("completed");
    assert!(envelope.success);
    assert_eq!(envelope.field("fixed"), Some(&json!(false)));
    assert_eq!(delegate.call_count("fixer"), 0);
}

#[tokio::test]
async fn a_gate_can_only_be_decided_once() {
    let runner = runner(
        Arc::new(InMemoryStore::new()),
        audit_delegate(critical_findings()),
    );
    let status = runner.start(&Audit, json!({}), None).await.unwrap();
    let run_id = status.run_id();
    let gate = BreakpointId::gate(1);

    runner.resolve(&run_id, &gate, Decision::approve()).await.unwrap();
    let err = runner
        .resolve(&run_id, &gate, Decision::reject("late"))
        .await
        .unwrap_err();
    assert!(matches!(err, LoomError::GateTransition { .. }));
}

#[tokio::test]
async fn escalated_gate_stays_open() {
    let runner = runner(
        Arc::new(InMemoryStore::new()),
        audit_delegate(critical_findings()),
    );
    let status = runner.start(&Audit, json!({}), None).await.unwrap();
    let run_id = status.run_id();
    let gate = BreakpointId::gate(1);

    let record = runner.escalate(&run_id, &gate, "security-lead").await.unwrap();
    assert_eq!(record.state, GateState::Escalated);
    assert_eq!(record.audience.as_deref(), Some("security-lead"));
    assert_eq!(runner.pending(&run_id).await.unwrap().len(), 1);

    let resolved = runner.resolve(&run_id, &gate, Decision::approve()).await.unwrap();
    assert_eq!(resolved.state, GateState::Approved);
    assert!(runner.pending(&run_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn policy_reviewer_decides_inline() {
    let delegate = audit_delegate(critical_findings());
    let store = Arc::new(InMemoryStore::new());
    let runner = RunnerBuilder::new()
        .store_arc(store.clone())
        .delegate(delegate.clone())
        .reviewer(PolicyReviewer::approve_all())
        .build()
        .unwrap();

    let status = runner.start(&Audit, json!({}), None).await.unwrap();
    assert!(status.envelope().is_some());
    assert_eq!(delegate.call_count("fixer"), 1);

    let records = store.list_breakpoints(&status.run_id()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].state, GateState::Approved);
    assert_eq!(records[0].decision.as_ref().and_then(|d| d.reviewer.as_deref()), Some("policy"));
}

struct SignOff;

#[async_trait]
impl Process for SignOff {
    fn id(&self) -> &str {
        "sign-off"
    }

    async fn run(&self, ctx: &ExecutionContext) -> Result<ResultEnvelope, LoomError> {
        let started = ctx.now();
        ctx.approval(BreakpointSpec::new("Release", "Ship it?")).await?;
        ctx.finish(started, true, json!({"shipped": true}))
    }
}

#[tokio::test]
async fn rejected_approval_fails_the_run() {
    let runner = runner(Arc::new(InMemoryStore::new()), audit_delegate(json!([])));
    let status = runner.start(&SignOff, json!({}), None).await.unwrap();
    let run_id = status.run_id();

    runner
        .resolve(&run_id, &BreakpointId::gate(1), Decision::reject("not yet"))
        .await
        .unwrap();
    let done = runner.resume(&SignOff, &run_id).await.unwrap();
    let envelope = done.envelope().expect("finalized");

    assert!(!envelope.success);
    assert_eq!(envelope.field("error").unwrap()["code"], "gate_rejected");
    assert_eq!(runner.status(&run_id).await.unwrap().phase, RunPhase::Failed);
}
