//! TaskDescriptor - 1 回の delegate 呼び出しの宣言的な記述
//!
//! Descriptor は `TaskFactory::build(args, ctx)` が作る不変の値です。
//! - 同じ入力からは必ず同じ descriptor ができる（replay の前提）
//! - build は I/O をしない
//! - fingerprint（正規化 JSON の SHA-256）で replay 時の一致を確認する

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::ids::{EffectId, RunId};
use super::shape::Shape;

/// What kind of worker executes the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Agent,
    Shell,
    Node,
}

/// Name of the delegate capability (e.g. `"security-auditor"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DelegateName(String);

impl DelegateName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DelegateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Delegate reference: who does the work, with what request, returning what.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegateRef {
    pub name: DelegateName,
    pub request: Value,
    pub result_shape: Shape,
}

/// Side-channel I/O locations, relative to the run directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIo {
    pub input_path: String,
    pub output_path: String,
}

impl TaskIo {
    /// Conventional `tasks/<effect_id>/{input,result}.json` layout.
    pub fn for_effect(effect_id: &EffectId) -> Self {
        Self {
            input_path: format!("tasks/{effect_id}/input.json"),
            output_path: format!("tasks/{effect_id}/result.json"),
        }
    }
}

/// What a task factory may look at while building a descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskContext {
    pub run_id: RunId,
    pub process_id: String,
    pub effect_id: EffectId,
    pub io: TaskIo,
}

/// Immutable description of one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    kind: TaskKind,
    title: String,
    delegate: DelegateRef,
    io: TaskIo,
    #[serde(default)]
    labels: Vec<String>,
}

impl TaskDescriptor {
    /// Start an agent task. `io` comes from the [`TaskContext`].
    pub fn agent(
        title: impl Into<String>,
        delegate: impl Into<String>,
        ctx: &TaskContext,
    ) -> TaskDescriptorBuilder {
        TaskDescriptorBuilder {
            kind: TaskKind::Agent,
            title: title.into(),
            delegate: DelegateName::new(delegate),
            request: Value::Object(Default::default()),
            result_shape: Shape::Any,
            io: ctx.io.clone(),
            labels: Vec::new(),
        }
    }

    pub fn builder(
        kind: TaskKind,
        title: impl Into<String>,
        delegate: impl Into<String>,
        ctx: &TaskContext,
    ) -> TaskDescriptorBuilder {
        TaskDescriptorBuilder {
            kind,
            ..Self::agent(title, delegate, ctx)
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn delegate(&self) -> &DelegateRef {
        &self.delegate
    }

    pub fn io(&self) -> &TaskIo {
        &self.io
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Hex SHA-256 of the canonical JSON encoding.
    ///
    /// `serde_json::Value` objects keep keys sorted (no `preserve_order`), so
    /// equal descriptors always encode to the same bytes.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_value(self)
            .map(|v| v.to_string())
            .unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

pub struct TaskDescriptorBuilder {
    kind: TaskKind,
    title: String,
    delegate: DelegateName,
    request: Value,
    result_shape: Shape,
    io: TaskIo,
    labels: Vec<String>,
}

impl TaskDescriptorBuilder {
    pub fn request(mut self, request: Value) -> Self {
        self.request = request;
        self
    }

    pub fn returns(mut self, shape: impl Into<Shape>) -> Self {
        self.result_shape = shape.into();
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels.extend(labels.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> TaskDescriptor {
        TaskDescriptor {
            kind: self.kind,
            title: self.title,
            delegate: DelegateRef {
                name: self.delegate,
                request: self.request,
                result_shape: self.result_shape,
            },
            io: self.io,
            labels: self.labels,
        }
    }
}

/// Pure function of `(args, ctx)` producing a descriptor.
///
/// Closures with the matching signature implement this trait, so a process can
/// define tasks as plain `fn`s.
pub trait TaskFactory: Send + Sync {
    fn build(&self, args: &Value, ctx: &TaskContext) -> TaskDescriptor;
}

impl<F> TaskFactory for F
where
    F: Fn(&Value, &TaskContext) -> TaskDescriptor + Send + Sync,
{
    fn build(&self, args: &Value, ctx: &TaskContext) -> TaskDescriptor {
        self(args, ctx)
    }
}
