//! loom - durable process orchestration from the command line.
//!
//! Runs are stored under `runs_dir` (see `loom.toml`); a suspended run is
//! picked up again with `loom resolve` followed by `loom resume`.

mod processes;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use loom_core::app::{ProcessRunner, RunStatus, RunnerBuilder};
use loom_core::config::{RuntimeConfig, load_config, write_config};
use loom_core::domain::{BreakpointId, Decision, RunId};
use loom_core::impls::{CommandDelegate, FsStore};
use loom_core::logging;

const EXIT_FAILED: i32 = 1;
const EXIT_SUSPENDED: i32 = 2;
const EXIT_CANCELLED: i32 = 3;

#[derive(Parser)]
#[command(name = "loom", version, about = "Durable, replayable process orchestration")]
struct Cli {
    /// Config file.
    #[arg(long, global = true, default_value = "loom.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// List the processes this binary can run.
    Processes,
    /// Start a new run.
    Run {
        process: String,
        /// Input field as key=value; the value is parsed as JSON when it can be.
        #[arg(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,
        /// JSON file with the run inputs (merged under --input).
        #[arg(long)]
        inputs_file: Option<PathBuf>,
        /// Override the artifact directory for this run.
        #[arg(long)]
        output_dir: Option<String>,
        /// Override the framework for this run.
        #[arg(long)]
        framework: Option<String>,
    },
    /// Replay a run from its records.
    Resume { run_id: RunId },
    /// Record a decision for a breakpoint.
    Resolve {
        run_id: RunId,
        breakpoint_id: String,
        #[arg(long, conflicts_with = "reject", required_unless_present = "reject")]
        approve: bool,
        #[arg(long)]
        reject: bool,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        reviewer: Option<String>,
        /// JSON handed back to the process with the decision.
        #[arg(long)]
        revision: Option<String>,
    },
    /// Hand a breakpoint to another audience.
    Escalate {
        run_id: RunId,
        breakpoint_id: String,
        #[arg(long = "to")]
        audience: String,
    },
    /// Breakpoints waiting for a decision.
    Pending { run_id: RunId },
    /// Where a run stands.
    Status { run_id: RunId },
    /// Print the run journal.
    Journal { run_id: RunId },
    /// List stored runs.
    Runs,
}

#[tokio::main]
async fn main() {
    logging::init();
    match run().await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(EXIT_FAILED);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    if let Command::Init { force } = cli.command {
        cmd_init(&cli.config, force)?;
        return Ok(0);
    }

    let cfg = load_config(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;
    let runner = build_runner(&cfg)?;

    match cli.command {
        Command::Init { .. } => Ok(0),
        Command::Processes => {
            for id in runner.registry().ids() {
                println!("{id}");
            }
            Ok(0)
        }
        Command::Run {
            process,
            inputs,
            inputs_file,
            output_dir,
            framework,
        } => {
            let inputs = collect_inputs(inputs_file.as_deref(), &inputs)?;
            let mut options = cfg.process.clone();
            if let Some(dir) = output_dir {
                options.output_dir = dir;
            }
            if let Some(framework) = framework {
                options.framework = framework;
            }
            watch_ctrl_c(&runner);
            let status = runner
                .start_registered(&process, inputs, Some(options))
                .await?;
            report(status)
        }
        Command::Resume { run_id } => {
            watch_ctrl_c(&runner);
            let status = runner.resume_registered(&run_id).await?;
            report(status)
        }
        Command::Resolve {
            run_id,
            breakpoint_id,
            approve,
            reject: _,
            note,
            reviewer,
            revision,
        } => {
            let mut decision = match (approve, note) {
                (true, Some(note)) => Decision::approve().with_note(note),
                (true, None) => Decision::approve(),
                (false, note) => Decision::reject(note.unwrap_or_default()),
            };
            if let Some(reviewer) = reviewer {
                decision = decision.by(reviewer);
            }
            if let Some(raw) = revision {
                let value: Value =
                    serde_json::from_str(&raw).context("--revision must be JSON")?;
                decision = decision.with_revision(value);
            }
            let record = runner
                .resolve(&run_id, &BreakpointId::new(breakpoint_id), decision)
                .await?;
            print_json(&record)?;
            Ok(0)
        }
        Command::Escalate {
            run_id,
            breakpoint_id,
            audience,
        } => {
            let record = runner
                .escalate(&run_id, &BreakpointId::new(breakpoint_id), &audience)
                .await?;
            print_json(&record)?;
            Ok(0)
        }
        Command::Pending { run_id } => {
            print_json(&runner.pending(&run_id).await?)?;
            Ok(0)
        }
        Command::Status { run_id } => {
            print_json(&runner.status(&run_id).await?)?;
            Ok(0)
        }
        Command::Journal { run_id } => {
            for entry in runner.journal(&run_id).await? {
                println!("{}", serde_json::to_string(&entry)?);
            }
            Ok(0)
        }
        Command::Runs => {
            for run_id in runner.runs().await? {
                println!("{run_id}");
            }
            Ok(0)
        }
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &RuntimeConfig::default())
        .with_context(|| format!("write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

fn build_runner(cfg: &RuntimeConfig) -> Result<ProcessRunner> {
    let runner = RunnerBuilder::new()
        .config(cfg)
        .store(FsStore::new(&cfg.runs_dir))
        .delegate(CommandDelegate::new(cfg.delegates.clone()))
        .registry(processes::registry()?)
        .expect_processes(&["audit"])
        .build()?;
    Ok(runner)
}

/// Cancel in-flight runs on Ctrl-C; they stay resumable.
fn watch_ctrl_c(runner: &ProcessRunner) {
    let handle = runner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; cancelling run");
            handle.cancel();
        }
    });
}

fn collect_inputs(file: Option<&Path>, pairs: &[String]) -> Result<Value> {
    let mut inputs = match file {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("read {}", path.display()))?;
            match serde_json::from_str(&raw)
                .with_context(|| format!("parse {}", path.display()))?
            {
                Value::Object(map) => map,
                _ => bail!("{} must contain a JSON object", path.display()),
            }
        }
        None => Map::new(),
    };
    for (key, value) in parse_pairs(pairs)? {
        inputs.insert(key, value);
    }
    Ok(Value::Object(inputs))
}

fn parse_pairs(pairs: &[String]) -> Result<BTreeMap<String, Value>> {
    let mut out = BTreeMap::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("expected KEY=VALUE, got `{pair}`");
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw));
        out.insert(key.trim().to_string(), value);
    }
    Ok(out)
}

fn report(status: RunStatus) -> Result<i32> {
    match status {
        RunStatus::Completed(envelope) => {
            let code = if envelope.success { 0 } else { EXIT_FAILED };
            print_json(&envelope)?;
            Ok(code)
        }
        RunStatus::Suspended {
            run_id,
            breakpoint_id,
            pending,
        } => {
            eprintln!("run {run_id} is waiting at breakpoint {breakpoint_id}");
            eprintln!("  loom resolve {run_id} {breakpoint_id} --approve   then   loom resume {run_id}");
            print_json(&pending)?;
            Ok(EXIT_SUSPENDED)
        }
        RunStatus::Cancelled { run_id } => {
            eprintln!("run {run_id} was cancelled; `loom resume {run_id}` continues it");
            Ok(EXIT_CANCELLED)
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pairs_parse_json_or_fall_back_to_strings() {
        let parsed = parse_pairs(&[
            "target=contracts/".to_string(),
            "depth=3".to_string(),
            "strict=true".to_string(),
        ])
        .unwrap();
        assert_eq!(parsed["target"], json!("contracts/"));
        assert_eq!(parsed["depth"], json!(3));
        assert_eq!(parsed["strict"], json!(true));
    }

    #[test]
    fn pair_without_equals_is_rejected() {
        assert!(parse_pairs(&["target".to_string()]).is_err());
    }

    #[test]
    fn input_pairs_override_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inputs.json");
        fs::write(&path, r#"{"target": "a", "keep": 1}"#).unwrap();
        let inputs = collect_inputs(Some(&path), &["target=b".to_string()]).unwrap();
        assert_eq!(inputs, json!({"target": "b", "keep": 1}));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
