//! ScriptedDelegate - テスト・デモ用の Delegate
//!
//! delegate 名ごとに返信を積んでおき、呼ばれた順に返します。
//! キューが空になったら `respond_with` で登録した関数にフォールバックします。
//! 呼び出し回数と受け取ったリクエストを記録するので、
//! 「resume で delegate が呼ばれないこと」をテストで確認できます。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::descriptor::DelegateName;
use crate::domain::errors::DelegateError;
use crate::ports::{Delegate, DelegateReply, DelegateRequest};

type Responder = Arc<dyn Fn(&DelegateRequest) -> Result<DelegateReply, DelegateError> + Send + Sync>;

#[derive(Default)]
struct Script {
    queued: HashMap<String, VecDeque<Result<DelegateReply, DelegateError>>>,
    responders: HashMap<String, Responder>,
    delays: HashMap<String, Duration>,
    calls: Vec<(String, DelegateRequest)>,
}

#[derive(Default, Clone)]
pub struct ScriptedDelegate {
    script: Arc<Mutex<Script>>,
}

impl ScriptedDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, name: &str, reply: Result<DelegateReply, DelegateError>) {
        self.lock()
            .queued
            .entry(name.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Queue a structured reply.
    pub fn reply(self, name: &str, value: Value) -> Self {
        self.push(name, Ok(DelegateReply::Structured(value)));
        self
    }

    /// Queue a raw text reply.
    pub fn text(self, name: &str, text: impl Into<String>) -> Self {
        self.push(name, Ok(DelegateReply::Text(text.into())));
        self
    }

    /// Queue a failure.
    pub fn fail(self, name: &str, error: DelegateError) -> Self {
        self.push(name, Err(error));
        self
    }

    /// Answer every call to `name` that has no queued reply.
    pub fn respond_with<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&DelegateRequest) -> Result<DelegateReply, DelegateError> + Send + Sync + 'static,
    {
        self.lock().responders.insert(name.to_string(), Arc::new(f));
        self
    }

    /// Sleep before answering calls to `name`.
    pub fn delay(self, name: &str, by: Duration) -> Self {
        self.lock().delays.insert(name.to_string(), by);
        self
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.lock().calls.iter().filter(|(n, _)| n == name).count()
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.len()
    }

    /// Requests received so far, in call order.
    pub fn requests(&self, name: &str) -> Vec<DelegateRequest> {
        self.lock()
            .calls
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, r)| r.clone())
            .collect()
    }
}

#[async_trait]
impl Delegate for ScriptedDelegate {
    async fn invoke(
        &self,
        name: &DelegateName,
        request: &DelegateRequest,
    ) -> Result<DelegateReply, DelegateError> {
        let (delay, answer) = {
            let mut script = self.lock();
            script.calls.push((name.to_string(), request.clone()));
            let delay = script.delays.get(name.as_str()).copied();
            let queued = script
                .queued
                .get_mut(name.as_str())
                .and_then(VecDeque::pop_front);
            let answer = match queued {
                Some(answer) => answer,
                None => match script.responders.get(name.as_str()) {
                    Some(responder) => responder(request),
                    None => Err(DelegateError::refused(format!(
                        "no scripted reply for delegate `{name}`"
                    ))),
                },
            };
            (delay, answer)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        answer
    }
}
