//! Scripted collaborators for controller and exchange tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use streamrelay_core::channel::{MessageId, MessagingEndpoint};
use streamrelay_core::error::{ChannelError, MemoryError, ProviderError, ToolError};
use streamrelay_core::memory::{ExchangeRecord, HistoryLoader, NewRecord, PersistenceSink};
use streamrelay_core::metrics::MetricsSink;
use streamrelay_core::provider::{
    MergeMode, Provider, ProviderRequest, ProviderResponse, StreamEvent, ToolCallFragment,
};
use streamrelay_core::tool::{ToolDefinition, ToolExecutor, ToolInvoker};
use tokio::sync::mpsc;

pub(crate) fn text(s: &str) -> StreamEvent {
    StreamEvent::TextFragment(s.into())
}

pub(crate) fn usage(tokens: u64) -> StreamEvent {
    StreamEvent::UsageUpdate(tokens)
}

/// A delta-style fragment.
pub(crate) fn delta(index: u32, id: Option<&str>, name: Option<&str>, args: &str) -> StreamEvent {
    StreamEvent::ToolCallFragment(ToolCallFragment {
        index,
        id: id.map(String::from),
        name: name.map(String::from),
        arguments: args.into(),
        merge: MergeMode::Concatenate,
    })
}

/// A complete single-fragment call.
pub(crate) fn call(index: u32, id: &str, name: &str, args: &str) -> StreamEvent {
    delta(index, Some(id), Some(name), args)
}

/// A provider that replays one scripted event list per stream call.
///
/// When `repeat_last` is set the final script is replayed forever;
/// otherwise running out of scripts yields an empty stream.
pub(crate) struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<StreamEvent>>>,
    completions: Mutex<VecDeque<ProviderResponse>>,
    repeat_last: bool,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub(crate) fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            completions: Mutex::new(VecDeque::new()),
            repeat_last: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn forever(script: Vec<StreamEvent>) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![script])
        }
    }

    pub(crate) fn with_completion(self, response: ProviderResponse) -> Self {
        self.completions.lock().unwrap().push_back(response);
        self
    }

    pub(crate) fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete_turn(
        &self,
        request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::NotConfigured("no scripted completion".into()))
    }

    async fn stream_turn(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if self.repeat_last && scripts.len() == 1 {
                scripts.front().cloned().unwrap_or_default()
            } else {
                scripts.pop_front().unwrap_or_default()
            }
        };

        let (tx, rx) = mpsc::channel(script.len().max(1));
        for event in script {
            let _ = tx.try_send(event);
        }
        Ok(rx)
    }
}

/// Tools answering from a fixed table; names mapped to `Err` fail on execute.
#[derive(Default)]
pub(crate) struct MockTools {
    answers: HashMap<String, Result<String, String>>,
    calls: std::sync::Arc<Mutex<Vec<(String, serde_json::Map<String, serde_json::Value>)>>>,
}

impl MockTools {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn answering(mut self, name: &str, output: &str) -> Self {
        self.answers.insert(name.into(), Ok(output.into()));
        self
    }

    pub(crate) fn failing(mut self, name: &str, reason: &str) -> Self {
        self.answers.insert(name.into(), Err(reason.into()));
        self
    }

    pub(crate) fn calls(&self) -> Vec<(String, serde_json::Map<String, serde_json::Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

struct MockExecutor {
    answer: Result<String, String>,
    calls: std::sync::Arc<Mutex<Vec<(String, serde_json::Map<String, serde_json::Value>)>>>,
}

#[async_trait]
impl ToolExecutor for MockExecutor {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((tool_name.to_string(), arguments.clone()));
        self.answer.clone().map_err(|reason| ToolError::ExecutionFailed {
            tool_name: tool_name.to_string(),
            reason,
        })
    }
}

impl ToolInvoker for MockTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut names: Vec<&String> = self.answers.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| ToolDefinition {
                name: name.clone(),
                description: format!("mock {name}"),
                parameters: serde_json::json!({"type": "object"}),
            })
            .collect()
    }

    fn resolve(&self, tool_name: &str) -> Result<std::sync::Arc<dyn ToolExecutor>, ToolError> {
        let answer = self
            .answers
            .get(tool_name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;
        Ok(std::sync::Arc::new(MockExecutor {
            answer,
            calls: self.calls.clone(),
        }))
    }
}

/// History plus a log of every insert.
#[derive(Default)]
pub(crate) struct RecordingStore {
    history: Vec<ExchangeRecord>,
    inserted: Mutex<Vec<(String, NewRecord, bool)>>,
}

impl RecordingStore {
    pub(crate) fn with_history(history: Vec<ExchangeRecord>) -> Self {
        Self {
            history,
            inserted: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn inserted(&self) -> Vec<(String, NewRecord, bool)> {
        self.inserted.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistoryLoader for RecordingStore {
    async fn recent(&self, _user_id: &str, limit: usize) -> Result<Vec<ExchangeRecord>, MemoryError> {
        let skip = self.history.len().saturating_sub(limit);
        Ok(self.history[skip..].to_vec())
    }
}

#[async_trait]
impl PersistenceSink for RecordingStore {
    async fn insert_record(
        &self,
        user_id: &str,
        record: NewRecord,
        is_final: bool,
    ) -> Result<i64, MemoryError> {
        let mut inserted = self.inserted.lock().unwrap();
        inserted.push((user_id.to_string(), record, is_final));
        Ok(inserted.len() as i64)
    }
}

#[derive(Default)]
pub(crate) struct RecordingMetrics {
    pub(crate) tokens: AtomicU64,
    pub(crate) active: AtomicI64,
    pub(crate) durations: Mutex<Vec<f64>>,
}

impl MetricsSink for RecordingMetrics {
    fn add_tokens(&self, tokens: u64) {
        self.tokens.fetch_add(tokens, Ordering::Relaxed);
    }

    fn observe_exchange_duration(&self, secs: f64) {
        self.durations.lock().unwrap().push(secs);
    }

    fn exchange_active(&self, delta: i64) {
        self.active.fetch_add(delta, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sent {
    Create(String),
    Edit(MessageId, String),
}

/// An endpoint that accepts everything and remembers it.
#[derive(Default)]
pub(crate) struct RecordingEndpoint {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingEndpoint {
    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingEndpoint for RecordingEndpoint {
    fn name(&self) -> &str {
        "recording"
    }

    async fn create_message(
        &self,
        _chat_id: i64,
        _reply_to: Option<MessageId>,
        text: &str,
        _formatted: bool,
    ) -> Result<MessageId, ChannelError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(Sent::Create(text.into()));
        Ok(MessageId(sent.len() as i64))
    }

    async fn edit_message(
        &self,
        _chat_id: i64,
        message_id: MessageId,
        text: &str,
        _formatted: bool,
    ) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(Sent::Edit(message_id, text.into()));
        Ok(())
    }
}
