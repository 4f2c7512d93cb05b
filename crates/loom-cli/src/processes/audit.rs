//! Audit - スマートコントラクト監査パイプライン
//!
//! ```text
//! scan ──▶ triage ──▶ parallel { report, fix-plan }
//!                           │
//!                           ▼
//!            breakpoint if any critical finding
//!                           │ approved (or not raised)
//!                           ▼
//!                        apply fixes
//! ```
//!
//! Delegates: `scanner`, `triager`, `reporter`, `planner`, `fixer`.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::Level;

use loom_core::app::{ExecutionContext, Process, SeverityThreshold};
use loom_core::domain::{
    BreakpointSpec, LoomError, ResultEnvelope, Shape, TaskContext, TaskDescriptor,
};

fn finding() -> Shape {
    Shape::object()
        .required("id", Shape::string())
        .required("severity", Shape::one_of(["info", "low", "medium", "high", "critical"]))
        .optional("title", Shape::string())
        .optional("location", Shape::string())
        .build()
}

fn scan(args: &Value, ctx: &TaskContext) -> TaskDescriptor {
    TaskDescriptor::agent("Scan contracts", "scanner", ctx)
        .request(json!({
            "target": args["target"],
            "framework": args["framework"],
            "output": ctx.io.output_path,
        }))
        .returns(
            Shape::object()
                .required("findings", Shape::array(finding()))
                .build(),
        )
        .label("scan")
        .build()
}

fn triage(args: &Value, ctx: &TaskContext) -> TaskDescriptor {
    TaskDescriptor::agent("Triage findings", "triager", ctx)
        .request(json!({"findings": args["findings"]}))
        .returns(
            Shape::object()
                .required("findings", Shape::array(finding()))
                .required("summary", Shape::string())
                .build(),
        )
        .label("triage")
        .build()
}

fn report(args: &Value, ctx: &TaskContext) -> TaskDescriptor {
    TaskDescriptor::agent("Write audit report", "reporter", ctx)
        .request(json!({
            "summary": args["summary"],
            "findings": args["findings"],
            "path": args["report_path"],
        }))
        .label("report")
        .build()
}

fn fix_plan(args: &Value, ctx: &TaskContext) -> TaskDescriptor {
    TaskDescriptor::agent("Plan fixes", "planner", ctx)
        .request(json!({"findings": args["findings"], "path": args["plan_path"]}))
        .returns(
            Shape::object()
                .required("steps", Shape::array(Shape::string()))
                .build(),
        )
        .label("fix-plan")
        .build()
}

fn apply_fixes(args: &Value, ctx: &TaskContext) -> TaskDescriptor {
    TaskDescriptor::agent("Apply fixes", "fixer", ctx)
        .request(json!({"steps": args["steps"], "revision": args["revision"]}))
        .returns(Shape::object().required("patched", Shape::Integer).build())
        .label("fix")
        .build()
}

pub struct Audit;

#[async_trait]
impl Process for Audit {
    fn id(&self) -> &str {
        "audit"
    }

    async fn run(&self, ctx: &ExecutionContext) -> Result<ResultEnvelope, LoomError> {
        let started = ctx.now();
        let options = ctx.options();
        let target = ctx.inputs().get("target").cloned().unwrap_or(json!("."));

        let scanned = ctx
            .task(&scan, &json!({"target": target, "framework": options.framework}))
            .await?;
        let triaged = ctx.task(&triage, &scanned.to_value()).await?;

        let mut args = triaged.to_value();
        args["report_path"] = json!(options.output_path("audit-report.md"));
        args["plan_path"] = json!(options.output_path("fix-plan.md"));
        let outputs = ctx
            .parallel()
            .all(vec![ctx.task(&report, &args), ctx.task(&fix_plan, &args)])
            .await?;
        let steps = outputs[1].get("steps").cloned().unwrap_or(json!([]));

        let threshold = SeverityThreshold::critical();
        let critical = threshold.count(&triaged.to_value());
        let decision = ctx
            .breakpoint_if(&threshold, &triaged, || {
                BreakpointSpec::new(
                    "Critical findings",
                    "Critical issues were found. Apply the planned fixes?",
                )
                .file(options.output_path("audit-report.md"), "markdown")
                .file(options.output_path("fix-plan.md"), "markdown")
                .field("critical", critical)
            })
            .await?;

        let apply = decision.as_ref().is_none_or(|d| d.is_approved());
        let patched = if apply {
            let revision = decision.and_then(|d| d.revision).unwrap_or(Value::Null);
            let fixed = ctx
                .task(&apply_fixes, &json!({"steps": steps, "revision": revision}))
                .await?;
            fixed.field::<u64>("patched").unwrap_or(0)
        } else {
            ctx.log(Level::INFO, "fixes declined; report only");
            0
        };

        ctx.finish(
            started,
            true,
            json!({
                "summary": triaged.get("summary"),
                "finding_count": triaged.get("findings").and_then(Value::as_array).map_or(0, Vec::len),
                "critical_count": critical,
                "fixes_applied": apply,
                "patched": patched,
            }),
        )
    }
}
