//! RunnerBuilder - ProcessRunner の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）：必須の port と期待される process を build() で確認
//! - 省略可能な port には既定値（SystemClock / UlidGenerator / DeferredReviewer）

use std::sync::Arc;

use tokio::sync::watch;

use crate::app::process::{Process, ProcessRegistry, RegistryError};
use crate::app::retry::RetryPolicy;
use crate::app::runner::ProcessRunner;
use crate::config::RuntimeConfig;
use crate::domain::spec::ProcessOptions;
use crate::impls::reviewer::DeferredReviewer;
use crate::ports::{
    Clock, Delegate, EffectStore, IdGenerator, ReviewerChannel, SystemClock, UlidGenerator,
};

/// RunnerBuilder は ProcessRunner を構築
///
/// # 使用例
/// ```ignore
/// let runner = RunnerBuilder::new()
///     .store(FsStore::new(".loom/runs"))
///     .delegate(CommandDelegate::new())
///     .register(Audit)?
///     .expect_processes(&["audit"])
///     .build()?;
/// ```
pub struct RunnerBuilder {
    store: Option<Arc<dyn EffectStore>>,
    delegate: Option<Arc<dyn Delegate>>,
    reviewer: Option<Arc<dyn ReviewerChannel>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    retry: RetryPolicy,
    defaults: ProcessOptions,
    registry: ProcessRegistry,
    expected_processes: Option<Vec<String>>,
}

/// BuildError は runner 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing component: {0}")]
    MissingComponent(&'static str),

    #[error("missing processes: {0:?}. These processes were expected but not registered.")]
    MissingProcesses(Vec<String>),
}

impl RunnerBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            delegate: None,
            reviewer: None,
            clock: None,
            ids: None,
            retry: RetryPolicy::default(),
            defaults: ProcessOptions::default(),
            registry: ProcessRegistry::new(),
            expected_processes: None,
        }
    }

    /// Retry policy and default process options from a loaded config.
    pub fn config(mut self, cfg: &RuntimeConfig) -> Self {
        self.retry = RetryPolicy::from_config(&cfg.retry);
        self.defaults = cfg.process.clone();
        self
    }

    pub fn store(self, store: impl EffectStore + 'static) -> Self {
        self.store_arc(Arc::new(store))
    }

    pub fn store_arc(mut self, store: Arc<dyn EffectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn delegate(self, delegate: impl Delegate + 'static) -> Self {
        self.delegate_arc(Arc::new(delegate))
    }

    pub fn delegate_arc(mut self, delegate: Arc<dyn Delegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn reviewer(mut self, reviewer: impl ReviewerChannel + 'static) -> Self {
        self.reviewer = Some(Arc::new(reviewer));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Options a run gets when `start` is not given any.
    pub fn defaults(mut self, defaults: ProcessOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Replace the registry wholesale.
    pub fn registry(mut self, registry: ProcessRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn register<P: Process + 'static>(mut self, process: P) -> Result<Self, RegistryError> {
        self.registry.register(process)?;
        Ok(self)
    }

    /// build() 時に登録済みであるべき process id
    pub fn expect_processes(mut self, ids: &[&str]) -> Self {
        self.expected_processes = Some(ids.iter().map(|id| id.to_string()).collect());
        self
    }

    /// # 検証
    /// - store / delegate が設定されているか
    /// - expect_processes() の id が全て登録されているか
    pub fn build(self) -> Result<ProcessRunner, BuildError> {
        let store = self.store.ok_or(BuildError::MissingComponent("store"))?;
        let delegate = self
            .delegate
            .ok_or(BuildError::MissingComponent("delegate"))?;

        if let Some(expected) = &self.expected_processes {
            let registered = self.registry.ids();
            let missing: Vec<String> = expected
                .iter()
                .filter(|id| !registered.contains(id))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingProcesses(missing));
            }
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let reviewer = self
            .reviewer
            .unwrap_or_else(|| Arc::new(DeferredReviewer));
        let (cancel, _) = watch::channel(false);

        Ok(ProcessRunner {
            store,
            delegate,
            reviewer,
            clock,
            ids,
            retry: self.retry,
            defaults: self.defaults,
            registry: self.registry,
            cancel: Arc::new(cancel),
        })
    }
}

impl Default for RunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
