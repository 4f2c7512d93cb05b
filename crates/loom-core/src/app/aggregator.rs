//! Artifact & result aggregator.
//!
//! Collects artifacts in emission order (no dedup) and produces the run's
//! `ResultEnvelope` exactly once.

use std::sync::{Mutex, MutexGuard};

use serde_json::{Map, Value};

use crate::domain::envelope::{ResultEnvelope, RunMetadata};
use crate::domain::errors::LoomError;
use crate::domain::outcome::Artifact;

/// Keys the envelope owns; domain fields may not reuse them.
pub const RESERVED_FIELDS: [&str; 4] = ["success", "artifacts", "duration_ms", "metadata"];

#[derive(Debug, Default)]
struct State {
    artifacts: Vec<Artifact>,
    finalized: bool,
}

#[derive(Debug, Default)]
pub struct ArtifactAggregator {
    state: Mutex<State>,
}

impl ArtifactAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn append(&self, artifacts: &[Artifact]) {
        self.lock().artifacts.extend_from_slice(artifacts);
    }

    pub fn snapshot(&self) -> Vec<Artifact> {
        self.lock().artifacts.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_finalized(&self) -> bool {
        self.lock().finalized
    }

    /// Build the envelope. A second call fails with `AlreadyFinalized`.
    pub fn finalize(
        &self,
        success: bool,
        fields: Map<String, Value>,
        metadata: RunMetadata,
        duration_ms: u64,
    ) -> Result<ResultEnvelope, LoomError> {
        if let Some(key) = RESERVED_FIELDS.iter().find(|k| fields.contains_key(**k)) {
            return Err(LoomError::InvalidInput(format!(
                "envelope field `{key}` is reserved"
            )));
        }

        let mut state = self.lock();
        if state.finalized {
            return Err(LoomError::AlreadyFinalized);
        }
        state.finalized = true;
        Ok(ResultEnvelope {
            success,
            fields,
            artifacts: state.artifacts.clone(),
            duration_ms,
            metadata,
        })
    }
}
