//! FsStore - ファイルシステム上の EffectStore（本番用）
//!
//! 人が読める JSON をそのまま置きます。
//!
//! ```text
//! <root>/<run_id>/run.json
//! <root>/<run_id>/journal.jsonl
//! <root>/<run_id>/tasks/<effect_id>/input.json
//! <root>/<run_id>/tasks/<effect_id>/result.json
//! <root>/<run_id>/tasks/<effect_id>/error.json
//! <root>/<run_id>/breakpoints/<breakpoint_id>.json
//! <root>/<run_id>/output.json
//! ```
//!
//! ドキュメントの書き込みは一時ファイル + rename でアトミックに行います。
//! journal は追記のみで、seq は run ごとのカウンタ（初回は既存行数から復元）。

use std::collections::HashMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::attempt::FailureRecord;
use crate::domain::breakpoint::BreakpointRecord;
use crate::domain::envelope::{ResultEnvelope, RunRecord};
use crate::domain::errors::StoreError;
use crate::domain::events::{JournalEntry, JournalEvent};
use crate::domain::ids::{BreakpointId, EffectId, RunId};
use crate::ports::{EffectStore, RequestRecord};

pub struct FsStore {
    root: PathBuf,
    /// run ごとの次の journal seq
    journal_seq: Mutex<HashMap<RunId, u64>>,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            journal_seq: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join(run_id.to_string())
    }

    fn task_dir(&self, run_id: &RunId, effect_id: &EffectId) -> PathBuf {
        self.run_dir(run_id).join("tasks").join(effect_id.as_str())
    }

    fn breakpoint_path(&self, run_id: &RunId, breakpoint_id: &BreakpointId) -> PathBuf {
        self.run_dir(run_id)
            .join("breakpoints")
            .join(format!("{breakpoint_id}.json"))
    }

    fn journal_path(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("journal.jsonl")
    }

    async fn ensure_run(&self, run_id: &RunId) -> Result<(), StoreError> {
        let path = self.run_dir(run_id).join("run.json");
        match fs::metadata(&path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Err(StoreError::RunNotFound(*run_id)),
            Err(e) => Err(io_err(&path, e)),
        }
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.display().to_string(),
            source,
        })
}

/// Write `value` as pretty JSON through a temp file and a rename.
async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let contents = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Corrupt {
        path: path.display().to_string(),
        source,
    })?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err(parent, e))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .await
        .map_err(|e| io_err(&tmp_path, e))?;
    fs::rename(&tmp_path, path)
        .await
        .map_err(|e| io_err(path, e))
}

#[async_trait]
impl EffectStore for FsStore {
    async fn create_run(&self, record: &RunRecord) -> Result<(), StoreError> {
        let run_id = record.metadata.run_id;
        let path = self.run_dir(&run_id).join("run.json");
        if fs::metadata(&path).await.is_ok() {
            return Err(StoreError::RunExists(run_id));
        }
        write_json_atomic(&path, record).await?;
        debug!(run_id = %run_id, path = %path.display(), "run created");
        Ok(())
    }

    async fn load_run(&self, run_id: &RunId) -> Result<RunRecord, StoreError> {
        let path = self.run_dir(run_id).join("run.json");
        read_json(&path)
            .await?
            .ok_or(StoreError::RunNotFound(*run_id))
    }

    async fn list_runs(&self) -> Result<Vec<RunId>, StoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.root, e)),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_err(&self.root, e))?
        {
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<RunId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn load_request(
        &self,
        run_id: &RunId,
        effect_id: &EffectId,
    ) -> Result<Option<RequestRecord>, StoreError> {
        read_json(&self.task_dir(run_id, effect_id).join("input.json")).await
    }

    async fn put_request(&self, run_id: &RunId, request: &RequestRecord) -> Result<(), StoreError> {
        self.ensure_run(run_id).await?;
        let path = self.task_dir(run_id, &request.effect_id).join("input.json");
        write_json_atomic(&path, request).await
    }

    async fn load_result(
        &self,
        run_id: &RunId,
        effect_id: &EffectId,
    ) -> Result<Option<Value>, StoreError> {
        read_json(&self.task_dir(run_id, effect_id).join("result.json")).await
    }

    async fn put_result(
        &self,
        run_id: &RunId,
        effect_id: &EffectId,
        result: &Value,
    ) -> Result<(), StoreError> {
        self.ensure_run(run_id).await?;
        let path = self.task_dir(run_id, effect_id).join("result.json");
        match read_json::<Value>(&path).await? {
            Some(existing) if &existing == result => Ok(()),
            Some(_) => Err(StoreError::Conflict(path.display().to_string())),
            None => write_json_atomic(&path, result).await,
        }
    }

    async fn put_failure(&self, run_id: &RunId, failure: &FailureRecord) -> Result<(), StoreError> {
        self.ensure_run(run_id).await?;
        let path = self.task_dir(run_id, &failure.effect_id).join("error.json");
        write_json_atomic(&path, failure).await
    }

    async fn load_failure(
        &self,
        run_id: &RunId,
        effect_id: &EffectId,
    ) -> Result<Option<FailureRecord>, StoreError> {
        read_json(&self.task_dir(run_id, effect_id).join("error.json")).await
    }

    async fn load_breakpoint(
        &self,
        run_id: &RunId,
        breakpoint_id: &BreakpointId,
    ) -> Result<Option<BreakpointRecord>, StoreError> {
        read_json(&self.breakpoint_path(run_id, breakpoint_id)).await
    }

    async fn put_breakpoint(
        &self,
        run_id: &RunId,
        record: &BreakpointRecord,
    ) -> Result<(), StoreError> {
        self.ensure_run(run_id).await?;
        write_json_atomic(&self.breakpoint_path(run_id, &record.id), record).await
    }

    async fn list_breakpoints(&self, run_id: &RunId) -> Result<Vec<BreakpointRecord>, StoreError> {
        self.ensure_run(run_id).await?;
        let dir = self.run_dir(run_id).join("breakpoints");
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&dir, e)),
        };
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(&dir, e))? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = read_json::<BreakpointRecord>(&path).await? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn append_event(
        &self,
        run_id: &RunId,
        event: JournalEvent,
        recorded_at: DateTime<Utc>,
    ) -> Result<JournalEntry, StoreError> {
        self.ensure_run(run_id).await?;
        let path = self.journal_path(run_id);

        // カウンタのロックを書き込み完了まで保持して seq と行順を一致させる
        let mut seqs = self.journal_seq.lock().await;
        let next = match seqs.get(run_id) {
            Some(next) => *next,
            None => self.read_journal(run_id).await?.len() as u64 + 1,
        };

        let entry = JournalEntry {
            seq: next,
            recorded_at,
            event,
        };
        let mut line = serde_json::to_string(&entry).map_err(|source| StoreError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_err(&path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| io_err(&path, e))?;
        file.flush().await.map_err(|e| io_err(&path, e))?;

        seqs.insert(*run_id, next + 1);
        Ok(entry)
    }

    async fn read_journal(&self, run_id: &RunId) -> Result<Vec<JournalEntry>, StoreError> {
        let path = self.journal_path(run_id);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                self.ensure_run(run_id).await?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(io_err(&path, e)),
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|source| StoreError::Corrupt {
                    path: path.display().to_string(),
                    source,
                })
            })
            .collect()
    }

    async fn put_output(&self, run_id: &RunId, envelope: &ResultEnvelope) -> Result<(), StoreError> {
        self.ensure_run(run_id).await?;
        write_json_atomic(&self.run_dir(run_id).join("output.json"), envelope).await
    }

    async fn load_output(&self, run_id: &RunId) -> Result<Option<ResultEnvelope>, StoreError> {
        read_json(&self.run_dir(run_id).join("output.json")).await
    }
}
