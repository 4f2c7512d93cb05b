//! Run-level tests: program order, determinism, finalized and cancelled runs.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use common::{Pipeline, artifact_paths, pipeline_delegate, runner};
use loom_core::app::{RunPhase, RunStatus};
use loom_core::domain::{EffectId, JournalEntry};
use loom_core::impls::InMemoryStore;
use loom_core::ports::EffectStore;

fn event_types(journal: &[JournalEntry]) -> Vec<String> {
    journal
        .iter()
        .map(|e| serde_json::to_value(&e.event).unwrap()["type"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn artifacts_follow_program_order() {
    let delegate = pipeline_delegate();
    let runner = runner(Arc::new(InMemoryStore::new()), delegate.clone());

    let status = runner
        .start_registered("pipeline", json!({"target": "src/"}), None)
        .await
        .unwrap();
    let envelope = status.into_envelope().expect("completed");

    assert!(envelope.success);
    // reporter is slower than planner; its artifact still comes first
    assert_eq!(
        artifact_paths(&envelope),
        ["scan.json", "triage.md", "report.md", "fix-plan.md"]
    );
    assert_eq!(envelope.field("summary"), Some(&json!("one high finding")));
    assert_eq!(envelope.field("branches"), Some(&json!(2)));
    assert_eq!(envelope.metadata.process_id, "pipeline");
    assert_eq!(delegate.total_calls(), 4);
}

#[tokio::test]
async fn identical_replies_give_identical_envelopes() {
    let delegate = pipeline_delegate();
    let runner = runner(Arc::new(InMemoryStore::new()), delegate);
    let inputs = json!({"target": "src/"});

    let first = runner.start_registered("pipeline", inputs.clone(), None).await.unwrap();
    let second = runner.start_registered("pipeline", inputs, None).await.unwrap();
    assert_ne!(first.run_id(), second.run_id());

    let (a, b) = (first.envelope().unwrap(), second.envelope().unwrap());
    assert_eq!(a.success, b.success);
    assert_eq!(a.fields, b.fields);
    assert_eq!(a.artifacts, b.artifacts);

    let ja = runner.journal(&first.run_id()).await.unwrap();
    let jb = runner.journal(&second.run_id()).await.unwrap();
    assert_eq!(event_types(&ja), event_types(&jb));
}

#[tokio::test]
async fn effect_ids_are_sequential_in_program_order() {
    let delegate = pipeline_delegate();
    let runner = runner(Arc::new(InMemoryStore::new()), delegate.clone());
    let status = runner
        .start_registered("pipeline", json!({"target": "src/"}), None)
        .await
        .unwrap();

    let effect_of = |name: &str| delegate.requests(name)[0].effect_id.clone();
    assert_eq!(effect_of("scanner"), EffectId::task(1));
    assert_eq!(effect_of("triager"), EffectId::task(2));
    assert_eq!(effect_of("reporter"), EffectId::task(3));
    assert_eq!(effect_of("planner"), EffectId::task(4));
    assert_eq!(delegate.requests("scanner")[0].run_id, status.run_id());
}

#[tokio::test]
async fn resuming_a_finished_run_returns_the_stored_envelope() {
    let delegate = pipeline_delegate();
    let runner = runner(Arc::new(InMemoryStore::new()), delegate.clone());
    let first = runner
        .start_registered("pipeline", json!({"target": "src/"}), None)
        .await
        .unwrap();

    let again = runner.resume_registered(&first.run_id()).await.unwrap();
    assert_eq!(again, first);
    assert_eq!(delegate.total_calls(), 4);
}

#[tokio::test]
async fn resume_rejects_a_different_process() {
    let runner = runner(Arc::new(InMemoryStore::new()), pipeline_delegate());
    let status = runner
        .start_registered("pipeline", json!({"target": "src/"}), None)
        .await
        .unwrap();

    let err = runner
        .resume(&common::Audit, &status.run_id())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_input");
}

#[tokio::test]
async fn unknown_process_is_invalid_input() {
    let runner = runner(Arc::new(InMemoryStore::new()), pipeline_delegate());
    let err = runner
        .start_registered("nope", Value::Null, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_input");
    assert!(runner.runs().await.unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_run_resumes_without_reinvoking_finished_tasks() {
    let delegate = pipeline_delegate().delay("triager", Duration::from_millis(150));
    let runner = runner(Arc::new(InMemoryStore::new()), delegate.clone());
    let handle = runner.cancel_handle();

    let (status, ()) = tokio::join!(
        runner.start(&Pipeline, json!({"target": "src/"}), None),
        async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            handle.cancel();
        }
    );
    let status = status.unwrap();
    let run_id = status.run_id();
    assert_eq!(status, RunStatus::Cancelled { run_id });

    // triage was already in flight and ran to completion
    assert_eq!(delegate.call_count("scanner"), 1);
    assert_eq!(delegate.call_count("triager"), 1);
    assert_eq!(delegate.call_count("reporter"), 0);
    let journal = runner.journal(&run_id).await.unwrap();
    assert_eq!(event_types(&journal).last().unwrap(), "RUN_CANCELLED");
    assert_eq!(runner.status(&run_id).await.unwrap().phase, RunPhase::Cancelled);

    handle.reset();
    let resumed = runner.resume(&Pipeline, &run_id).await.unwrap();
    let envelope = resumed.envelope().expect("completed");
    assert_eq!(artifact_paths(envelope).len(), 4);
    assert_eq!(delegate.call_count("scanner"), 1);
    assert_eq!(delegate.call_count("triager"), 1);
    assert_eq!(delegate.call_count("reporter"), 1);
    assert_eq!(delegate.call_count("planner"), 1);
}

#[tokio::test]
async fn cancelled_before_start_invokes_nothing() {
    let delegate = pipeline_delegate();
    let runner = runner(Arc::new(InMemoryStore::new()), delegate.clone());
    runner.cancel_handle().cancel();

    let status = runner.start(&Pipeline, json!({"target": "src/"}), None).await.unwrap();
    assert!(matches!(status, RunStatus::Cancelled { .. }));
    assert_eq!(delegate.total_calls(), 0);
    assert!(runner.store().load_output(&status.run_id()).await.unwrap().is_none());
}

#[tokio::test]
async fn status_counts_effects_of_a_completed_run() {
    let runner = runner(Arc::new(InMemoryStore::new()), pipeline_delegate());
    let status = runner
        .start_registered("pipeline", json!({"target": "src/"}), None)
        .await
        .unwrap();

    let summary = runner.status(&status.run_id()).await.unwrap();
    assert_eq!(summary.phase, RunPhase::Completed);
    assert_eq!(summary.effects_requested, 4);
    assert_eq!(summary.effects_resolved, 4);
    assert!(summary.failed_effects.is_empty());
    assert!(summary.pending_breakpoints.is_empty());
}
