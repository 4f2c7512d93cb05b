//! CommandDelegate - 外部コマンドとして delegate を実行する
//!
//! delegate 名ごとにプログラムを設定し、リクエスト（DelegateRequest の JSON）を
//! stdin に書き、stdout を返信として読みます（BOM 付き UTF-16 も decode）。
//!
//! - spawn できない / 名前が未設定 → `Unavailable`（リトライ対象）
//! - 終了コードが 0 以外 → `Refused`（stderr をメッセージに含める）
//! - 時間制限は scheduler 側の timeout が担当（drop 時に子プロセスを kill）

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::app::repair::decode_bytes;
use crate::domain::descriptor::DelegateName;
use crate::domain::errors::DelegateError;
use crate::ports::{Delegate, DelegateReply, DelegateRequest};

/// How to launch one delegate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandDelegate {
    commands: BTreeMap<String, CommandSpec>,
}

impl CommandDelegate {
    pub fn new(commands: BTreeMap<String, CommandSpec>) -> Self {
        Self { commands }
    }

    pub fn with_command(mut self, name: impl Into<String>, spec: CommandSpec) -> Self {
        self.commands.insert(name.into(), spec);
        self
    }
}

#[async_trait]
impl Delegate for CommandDelegate {
    async fn invoke(
        &self,
        name: &DelegateName,
        request: &DelegateRequest,
    ) -> Result<DelegateReply, DelegateError> {
        let spec = self.commands.get(name.as_str()).ok_or_else(|| {
            DelegateError::unavailable(format!("no command configured for delegate `{name}`"))
        })?;

        let payload = serde_json::to_vec(request)
            .map_err(|e| DelegateError::refused(format!("encode request: {e}")))?;

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        debug!(delegate = %name, effect_id = %request.effect_id, program = %spec.program, "spawning delegate");
        let mut child = cmd.spawn().map_err(|e| {
            warn!(delegate = %name, err = %e, "failed to spawn delegate");
            DelegateError::unavailable(format!("spawn `{}`: {e}", spec.program))
        })?;

        // stdin の書き込みと stdout/stderr の読み出しは並行に
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload).await?;
                // stdin を閉じて EOF を伝える
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output
            .map_err(|e| DelegateError::unavailable(format!("wait for `{}`: {e}", spec.program)))?;
        // 入力を読まずに終了した子プロセスは BrokenPipe になる。終了コードで判断する
        if let Err(e) = fed
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(DelegateError::unavailable(format!("write stdin: {e}")));
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DelegateError::refused(format!(
                "`{}` exited with {}: {}",
                spec.program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(DelegateReply::Text(decode_bytes(&output.stdout)))
    }
}
