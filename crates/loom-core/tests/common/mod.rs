//! Shared processes and wiring for the run-level tests.
//!
//! The processes here model a small audit pipeline:
//!
//! ```text
//! scan ──▶ triage ──▶ parallel { report, fix-plan }          (Pipeline)
//! scan ──▶ breakpoint if critical ──▶ fix                     (Audit)
//! parallel { check-a, check-b, check-c }                      (FanOut)
//! ```

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use loom_core::app::{
    ExecutionContext, Process, ProcessRunner, RetryPolicy, RunnerBuilder, SeverityThreshold,
};
use loom_core::domain::{
    BreakpointSpec, DelegateError, LoomError, ResultEnvelope, Shape, TaskContext, TaskDescriptor,
};
use loom_core::impls::ScriptedDelegate;
use loom_core::ports::{DelegateReply, DelegateRequest, EffectStore};

fn finding_shape() -> Shape {
    Shape::object()
        .required("severity", Shape::one_of(["low", "medium", "high", "critical"]))
        .build()
}

pub fn scan(args: &Value, ctx: &TaskContext) -> TaskDescriptor {
    TaskDescriptor::agent("Scan contracts", "scanner", ctx)
        .request(json!({"target": args["target"]}))
        .returns(
            Shape::object()
                .required("findings", Shape::array(finding_shape()))
                .build(),
        )
        .build()
}

pub fn triage(args: &Value, ctx: &TaskContext) -> TaskDescriptor {
    TaskDescriptor::agent("Triage findings", "triager", ctx)
        .request(json!({"findings": args["findings"]}))
        .returns(Shape::object().required("summary", Shape::string()).build())
        .build()
}

pub fn report(args: &Value, ctx: &TaskContext) -> TaskDescriptor {
    TaskDescriptor::agent("Write report", "reporter", ctx)
        .request(json!({"summary": args["summary"]}))
        .build()
}

pub fn fix_plan(args: &Value, ctx: &TaskContext) -> TaskDescriptor {
    TaskDescriptor::agent("Plan fixes", "planner", ctx)
        .request(json!({"summary": args["summary"]}))
        .build()
}

pub fn fix(args: &Value, ctx: &TaskContext) -> TaskDescriptor {
    TaskDescriptor::agent("Apply fixes", "fixer", ctx)
        .request(json!({"findings": args["findings"]}))
        .returns(Shape::object().required("patched", Shape::Integer).build())
        .build()
}

pub fn check(args: &Value, ctx: &TaskContext) -> TaskDescriptor {
    let name = args["name"].as_str().unwrap_or("a");
    TaskDescriptor::agent(format!("Check {name}"), format!("checker-{name}"), ctx)
        .returns(Shape::object().required("ok", Shape::Bool).build())
        .build()
}

pub struct Pipeline;

#[async_trait]
impl Process for Pipeline {
    fn id(&self) -> &str {
        "pipeline"
    }

    async fn run(&self, ctx: &ExecutionContext) -> Result<ResultEnvelope, LoomError> {
        let started = ctx.now();
        let scanned = ctx.task(&scan, ctx.inputs()).await?;
        let triaged = ctx.task(&triage, &scanned.to_value()).await?;
        let summary = triaged.to_value();
        let branches = ctx
            .parallel()
            .all(vec![ctx.task(&report, &summary), ctx.task(&fix_plan, &summary)])
            .await?;
        ctx.finish(
            started,
            true,
            json!({"summary": triaged.get("summary"), "branches": branches.len()}),
        )
    }
}

pub struct Audit;

#[async_trait]
impl Process for Audit {
    fn id(&self) -> &str {
        "audit"
    }

    async fn run(&self, ctx: &ExecutionContext) -> Result<ResultEnvelope, LoomError> {
        let started = ctx.now();
        let scanned = ctx.task(&scan, ctx.inputs()).await?;
        let threshold = SeverityThreshold::critical();
        let critical = threshold.count(&scanned.to_value());
        let gate = ctx
            .breakpoint_if(&threshold, &scanned, || {
                BreakpointSpec::new("Critical findings", "Apply the proposed fixes?")
                    .field("critical", critical)
            })
            .await?;
        let approved = gate.as_ref().is_none_or(|d| d.is_approved());
        let patched = if approved {
            let fixed = ctx.task(&fix, &scanned.to_value()).await?;
            fixed.field::<u64>("patched").unwrap_or(0)
        } else {
            0
        };
        ctx.finish(
            started,
            true,
            json!({"critical": critical, "fixed": approved, "patched": patched}),
        )
    }
}

pub struct FanOut;

#[async_trait]
impl Process for FanOut {
    fn id(&self) -> &str {
        "fan-out"
    }

    async fn run(&self, ctx: &ExecutionContext) -> Result<ResultEnvelope, LoomError> {
        let started = ctx.now();
        let calls = ["a", "b", "c"]
            .iter()
            .map(|name| ctx.task(&check, &json!({"name": name})))
            .collect();
        let results = ctx.parallel().all(calls).await?;
        ctx.finish(started, true, json!({"checked": results.len()}))
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        multiplier: 2.0,
        max_delay: Duration::from_millis(5),
        timeout: Duration::from_secs(2),
    }
}

pub fn runner(store: Arc<dyn EffectStore>, delegate: ScriptedDelegate) -> ProcessRunner {
    RunnerBuilder::new()
        .store_arc(store)
        .delegate(delegate)
        .retry(fast_retry(3))
        .register(Pipeline)
        .unwrap()
        .register(Audit)
        .unwrap()
        .register(FanOut)
        .unwrap()
        .expect_processes(&["pipeline", "audit", "fan-out"])
        .build()
        .unwrap()
}

fn always(
    value: Value,
) -> impl Fn(&DelegateRequest) -> Result<DelegateReply, DelegateError> + Send + Sync + 'static {
    move |_: &DelegateRequest| Ok(DelegateReply::Structured(value.clone()))
}

/// Delegates for every task in the pipeline, each emitting one artifact.
pub fn pipeline_delegate() -> ScriptedDelegate {
    ScriptedDelegate::new()
        .respond_with(
            "scanner",
            always(json!({
                "findings": [{"severity": "high"}],
                "artifacts": [{"path": "scan.json", "format": "json"}]
            })),
        )
        .respond_with(
            "triager",
            always(json!({
                "summary": "one high finding",
                "artifacts": [{"path": "triage.md"}]
            })),
        )
        .respond_with("reporter", always(json!({"artifacts": [{"path": "report.md"}]})))
        .respond_with("planner", always(json!({"artifacts": [{"path": "fix-plan.md"}]})))
        .delay("reporter", Duration::from_millis(30))
}

/// Delegates for the audit process; `findings` is what the scanner reports.
pub fn audit_delegate(findings: Value) -> ScriptedDelegate {
    ScriptedDelegate::new()
        .respond_with("scanner", always(json!({"findings": findings})))
        .respond_with("fixer", always(json!({"patched": 2})))
}

pub fn critical_findings() -> Value {
    json!([{"severity": "critical"}, {"severity": "low"}])
}

pub fn artifact_paths(envelope: &ResultEnvelope) -> Vec<String> {
    envelope.artifacts.iter().map(|a| a.path.clone()).collect()
}
