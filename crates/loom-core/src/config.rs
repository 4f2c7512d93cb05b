//! Runtime configuration (`loom.toml`).
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! Retry and timeout policy for delegate calls lives here rather than in code.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::spec::ProcessOptions;
use crate::impls::command_delegate::CommandSpec;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Root of the filesystem store.
    pub runs_dir: PathBuf,

    pub retry: RetryConfig,

    /// Defaults handed to every run that does not override them.
    pub process: ProcessOptions,

    /// Delegate name -> external command.
    pub delegates: BTreeMap<String, CommandSpec>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            runs_dir: PathBuf::from(".loom/runs"),
            retry: RetryConfig::default(),
            process: ProcessOptions::default(),
            delegates: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total tries per delegate call, first one included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Per-attempt time limit.
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            timeout_secs: 15 * 60,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runs_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("runs_dir must not be empty".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be > 0".into()));
        }
        if self.retry.timeout_secs == 0 {
            return Err(ConfigError::Invalid("retry.timeout_secs must be > 0".into()));
        }
        if !(self.retry.multiplier >= 1.0) {
            return Err(ConfigError::Invalid("retry.multiplier must be >= 1.0".into()));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.max_delay_ms must be >= retry.base_delay_ms".into(),
            ));
        }
        for (name, spec) in &self.delegates {
            if spec.program.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "delegates.{name}.program must not be empty"
                )));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RuntimeConfig::default()`.
pub fn load_config(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    if !path.exists() {
        let cfg = RuntimeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let cfg: RuntimeConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RuntimeConfig) -> Result<(), ConfigError> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg)?;
    buf.push('\n');

    let write_err = |p: &Path, source| ConfigError::Write {
        path: p.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, buf).map_err(|e| write_err(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| write_err(path, e))?;
    Ok(())
}
