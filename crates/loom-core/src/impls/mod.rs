//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **FsStore**: ファイルシステム上の正本（本番用）
//! - **InMemoryStore**: テスト・デモ用の正本
//! - **CommandDelegate**: 外部コマンドとしての delegate
//! - **ScriptedDelegate**: 返信を台本で返す delegate（テスト・デモ用）
//! - **DeferredReviewer / PolicyReviewer**: breakpoint の届け先

pub mod command_delegate;
pub mod fs_store;
pub mod memory_store;
pub mod reviewer;
pub mod scripted_delegate;

pub use self::command_delegate::{CommandDelegate, CommandSpec};
pub use self::fs_store::FsStore;
pub use self::memory_store::InMemoryStore;
pub use self::reviewer::{DeferredReviewer, PolicyReviewer};
pub use self::scripted_delegate::ScriptedDelegate;
