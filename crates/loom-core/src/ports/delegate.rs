//! Delegate port - タスクを実際に実行する外部の担い手
//!
//! エージェント、シェル、node スクリプトなど、中身は問いません。
//! Loom が期待するのは「リクエストを渡すと返信（または失敗）が返る」ことだけです。
//! リトライとタイムアウトは呼び出し側（scheduler）の責務です。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::descriptor::{DelegateName, TaskDescriptor, TaskIo, TaskKind};
use crate::domain::errors::DelegateError;
use crate::domain::ids::{EffectId, RunId};
use crate::domain::shape::Shape;

/// What a delegate receives for one task invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegateRequest {
    pub run_id: RunId,
    pub effect_id: EffectId,
    pub kind: TaskKind,
    pub title: String,
    pub request: Value,
    pub result_shape: Shape,
    pub io: TaskIo,
}

impl DelegateRequest {
    pub fn for_descriptor(run_id: RunId, effect_id: EffectId, descriptor: &TaskDescriptor) -> Self {
        Self {
            run_id,
            effect_id,
            kind: descriptor.kind(),
            title: descriptor.title().to_string(),
            request: descriptor.delegate().request.clone(),
            result_shape: descriptor.delegate().result_shape.clone(),
            io: descriptor.io().clone(),
        }
    }
}

/// A delegate reply before validation.
#[derive(Debug, Clone, PartialEq)]
pub enum DelegateReply {
    /// Already-parsed JSON.
    Structured(Value),
    /// Raw text; repaired and parsed by the scheduler.
    Text(String),
}

#[async_trait]
pub trait Delegate: Send + Sync {
    async fn invoke(
        &self,
        name: &DelegateName,
        request: &DelegateRequest,
    ) -> Result<DelegateReply, DelegateError>;
}
