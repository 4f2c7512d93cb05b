//! Process options: the defaults every process definition used to thread
//! through its own argument destructuring.
//!
//! One explicit struct, passed into each run and persisted in `run.json`, so a
//! resumed run sees exactly the options it started with.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessOptions {
    /// Where tasks are asked to write their artifacts (relative to the project).
    /// Default: `"artifacts"`.
    pub output_dir: String,

    /// Toolchain the delegates should assume (e.g. `foundry`, `hardhat`).
    /// Default: `"foundry"`.
    pub framework: String,

    /// Process-specific knobs that have no typed home.
    pub extra: BTreeMap<String, Value>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            output_dir: "artifacts".to_string(),
            framework: "foundry".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

impl ProcessOptions {
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// `output_dir` joined with a relative path, using `/` separators.
    pub fn output_path(&self, relative: &str) -> String {
        format!("{}/{}", self.output_dir.trim_end_matches('/'), relative)
    }
}
