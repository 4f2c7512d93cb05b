//! Process - process 定義と登録簿
//!
//! process 定義は「ctx だけを通して外部に触れる純粋な制御フロー」です。
//! ProcessRegistry は id → 定義の対応を持ち、二重登録を拒否します。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::app::context::ExecutionContext;
use crate::domain::envelope::ResultEnvelope;
use crate::domain::errors::LoomError;

/// A durable, replayable workflow.
///
/// # 使用例
/// ```ignore
/// struct Audit;
///
/// #[async_trait]
/// impl Process for Audit {
///     fn id(&self) -> &str { "audit" }
///
///     async fn run(&self, ctx: &ExecutionContext) -> Result<ResultEnvelope, LoomError> {
///         let started = ctx.now();
///         let scan = ctx.task(&scan_task, ctx.inputs()).await?;
///         ctx.finish(started, true, json!({"findings": scan.get("findings")}))
///     }
/// }
/// ```
#[async_trait]
pub trait Process: Send + Sync {
    fn id(&self) -> &str;

    async fn run(&self, ctx: &ExecutionContext) -> Result<ResultEnvelope, LoomError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("process '{0}' is already registered")]
    AlreadyRegistered(String),
}

#[derive(Default, Clone)]
pub struct ProcessRegistry {
    processes: HashMap<String, Arc<dyn Process>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: Process + 'static>(&mut self, process: P) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(process))
    }

    pub fn register_arc(&mut self, process: Arc<dyn Process>) -> Result<(), RegistryError> {
        let id = process.id().to_string();
        if self.processes.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        self.processes.insert(id, process);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Process>> {
        self.processes.get(id).cloned()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.processes.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
