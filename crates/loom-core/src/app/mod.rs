//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせて run の実行エンジンを実装します。
//!
//! # 主要コンポーネント
//! - **RunnerBuilder**: runner の構築とワイヤリング
//! - **ProcessRunner**: run の開始・再開・breakpoint 解決
//! - **ExecutionContext**: process から見た唯一の窓口（task / parallel / breakpoint / finish）
//! - **Scheduler**: 1 回のタスク呼び出し（replay・retry・検証・永続化）
//! - **BreakpointManager**: 人の判断ゲート
//! - **ArtifactAggregator**: run 全体の成果物リスト

pub mod aggregator;
pub mod builder;
pub mod context;
pub mod gate;
pub mod parallel;
pub mod process;
pub mod repair;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod status;

// 主要な型を再エクスポート
pub use self::aggregator::ArtifactAggregator;
pub use self::builder::{BuildError, RunnerBuilder};
pub use self::context::{ExecutionContext, Parallel, TaskCall};
pub use self::gate::{BreakpointManager, GatePredicate, GateStatus, SeverityThreshold};
pub use self::process::{Process, ProcessRegistry, RegistryError};
pub use self::retry::RetryPolicy;
pub use self::runner::{CancelHandle, ProcessRunner, RunStatus};
pub use self::scheduler::Scheduler;
pub use self::status::{RunPhase, RunSummary};
