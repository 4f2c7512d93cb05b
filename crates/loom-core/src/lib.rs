//! loom-core
//!
//! Durable, replayable process orchestration.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, descriptor, shape, outcome, breakpoint, decision, envelope, events, errors）
//! - **ports**: 抽象化レイヤー（EffectStore, Delegate, ReviewerChannel, Clock, IdGenerator）
//! - **app**: 実行エンジン（runner, context, scheduler, parallel, gate, aggregator, repair）
//! - **impls**: 実装（FsStore, InMemoryStore, CommandDelegate, ScriptedDelegate, reviewers）
//! - **config**: `loom.toml` の読み書き
//! - **logging**: tracing subscriber の初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod logging;
pub mod ports;

pub use app::{
    BuildError, ExecutionContext, Process, ProcessRunner, RunStatus, RunnerBuilder,
    SeverityThreshold,
};
pub use domain::{
    Artifact, BreakpointSpec, Decision, LoomError, ResultEnvelope, Shape, TaskDescriptor,
    TaskResult,
};
