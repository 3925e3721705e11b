//! End-to-end exchange scenarios.
//!
//! These run the full path: history store, scripted provider stream, tool
//! registry, turn controller, rendezvous channel and delivery pipeline.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use streamrelay_agent::{ExchangeRequest, ExchangeRunner, TurnController};
use streamrelay_config::AppConfig;
use streamrelay_core::channel::{ChatTarget, MessageId, MessagingEndpoint};
use streamrelay_core::error::{ChannelError, Error, ProviderError, ToolError};
use streamrelay_core::memory::HistoryLoader;
use streamrelay_core::message::{Conversation, Role, TurnContent};
use streamrelay_core::provider::{
    MergeMode, Provider, ProviderRequest, ProviderResponse, StreamEvent, ToolCallFragment,
};
use streamrelay_core::tool::{Tool, ToolRegistry};
use streamrelay_memory::InMemoryRecordStore;
use tokio::sync::mpsc;

// ── Scripted provider ────────────────────────────────────────────────────

/// Replays one event script per stream call and records every request.
struct ScriptedStream {
    scripts: Mutex<VecDeque<Vec<StreamEvent>>>,
    forever: Option<Vec<StreamEvent>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedStream {
    fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            forever: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn forever(script: Vec<StreamEvent>) -> Self {
        Self {
            forever: Some(script),
            ..Self::new(vec![])
        }
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedStream {
    fn name(&self) -> &str {
        "e2e_stream"
    }

    async fn complete_turn(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("streaming only".into()))
    }

    async fn stream_turn(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = match &self.forever {
            Some(script) => script.clone(),
            None => self.scripts.lock().unwrap().pop_front().unwrap_or_default(),
        };
        let (tx, rx) = mpsc::channel(script.len().max(1));
        for event in script {
            tx.try_send(event).unwrap();
        }
        Ok(rx)
    }
}

fn text(s: &str) -> StreamEvent {
    StreamEvent::TextFragment(s.into())
}

fn fragment(id: Option<&str>, name: Option<&str>, args: &str) -> StreamEvent {
    StreamEvent::ToolCallFragment(ToolCallFragment {
        index: 0,
        id: id.map(String::from),
        name: name.map(String::from),
        arguments: args.into(),
        merge: MergeMode::Concatenate,
    })
}

// ── Tools ────────────────────────────────────────────────────────────────

struct Lookup {
    queries: Mutex<Vec<String>>,
}

#[async_trait]
impl Tool for Lookup {
    fn name(&self) -> &str {
        "lookup"
    }

    fn description(&self) -> &str {
        "Look a topic up"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "q": { "type": "string" } },
            "required": ["q"]
        })
    }

    async fn call(
        &self,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, ToolError> {
        let q = arguments
            .get("q")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("missing q".into()))?;
        self.queries.lock().unwrap().push(q.to_string());
        Ok(match q {
            "weather" => "sunny".into(),
            other => format!("nothing about {other}"),
        })
    }
}

fn registry_with_lookup() -> (Arc<ToolRegistry>, Arc<Lookup>) {
    let lookup = Arc::new(Lookup {
        queries: Mutex::new(Vec::new()),
    });
    let mut registry = ToolRegistry::new();
    registry.register(lookup.clone());
    (Arc::new(registry), lookup)
}

// ── Endpoint ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Delivered {
    Create { reply_to: Option<MessageId>, text: String },
    Edit { id: MessageId, text: String },
}

/// Records deliveries; fails the first `rate_limited` calls with a rate limit.
#[derive(Default)]
struct ChatLog {
    delivered: Mutex<Vec<Delivered>>,
    rate_limited: Mutex<u32>,
}

impl ChatLog {
    fn rate_limited(times: u32) -> Self {
        Self {
            rate_limited: Mutex::new(times),
            ..Self::default()
        }
    }

    fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().unwrap().clone()
    }

    fn throttle(&self) -> Result<(), ChannelError> {
        let mut left = self.rate_limited.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            return Err(ChannelError::RateLimited { retry_after_secs: 3 });
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingEndpoint for ChatLog {
    fn name(&self) -> &str {
        "chat_log"
    }

    async fn create_message(
        &self,
        _chat_id: i64,
        reply_to: Option<MessageId>,
        text: &str,
        _formatted: bool,
    ) -> Result<MessageId, ChannelError> {
        self.throttle()?;
        let mut delivered = self.delivered.lock().unwrap();
        delivered.push(Delivered::Create {
            reply_to,
            text: text.into(),
        });
        Ok(MessageId(100 + delivered.len() as i64))
    }

    async fn edit_message(
        &self,
        _chat_id: i64,
        message_id: MessageId,
        text: &str,
        _formatted: bool,
    ) -> Result<(), ChannelError> {
        self.throttle()?;
        self.delivered.lock().unwrap().push(Delivered::Edit {
            id: message_id,
            text: text.into(),
        });
        Ok(())
    }
}

// ── Wiring ───────────────────────────────────────────────────────────────

fn quiet_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.delivery.thinking_text = None;
    config
}

fn runner(
    provider: Arc<ScriptedStream>,
    tools: Arc<ToolRegistry>,
    store: Arc<InMemoryRecordStore>,
    endpoint: Arc<ChatLog>,
    config: AppConfig,
) -> ExchangeRunner {
    let controller = TurnController::new(provider, tools, store.clone(), store, Arc::new(config));
    ExchangeRunner::new(controller, endpoint)
}

fn target() -> ChatTarget {
    ChatTarget::new(-500, Some(MessageId(9)))
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_plain_question_single_message() {
    let provider = Arc::new(ScriptedStream::new(vec![vec![
        text("4"),
        StreamEvent::UsageUpdate(5),
        StreamEvent::End,
    ]]));
    let store = Arc::new(InMemoryRecordStore::new());
    let endpoint = Arc::new(ChatLog::default());
    let runner = runner(
        provider,
        Arc::new(ToolRegistry::new()),
        store.clone(),
        endpoint.clone(),
        quiet_config(),
    );

    runner
        .run(target(), ExchangeRequest::new("u1", "What is 2+2?"))
        .await
        .unwrap();

    assert_eq!(
        endpoint.delivered(),
        vec![Delivered::Create {
            reply_to: Some(MessageId(9)),
            text: "4".into()
        }]
    );
    let history = store.recent("u1", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].question, "What is 2+2?");
    assert_eq!(history[0].answer, "4");
    assert_eq!(history[0].token_count, 5);
}

#[tokio::test]
async fn e2e_split_tool_arguments_drive_a_second_stream() {
    let provider = Arc::new(ScriptedStream::new(vec![
        vec![
            fragment(Some("call_w"), Some("lookup"), "{\"q\":\"w"),
            fragment(None, None, "eather\"}"),
            StreamEvent::UsageUpdate(12),
            StreamEvent::End,
        ],
        vec![
            text("It is "),
            text("sunny."),
            StreamEvent::UsageUpdate(20),
            StreamEvent::End,
        ],
    ]));
    let (tools, lookup) = registry_with_lookup();
    let store = Arc::new(InMemoryRecordStore::new());
    let endpoint = Arc::new(ChatLog::default());
    let runner = runner(provider.clone(), tools, store.clone(), endpoint.clone(), quiet_config());

    let outcome = runner
        .run(target(), ExchangeRequest::new("u1", "weather?"))
        .await
        .unwrap();

    assert_eq!(*lookup.queries.lock().unwrap(), vec!["weather".to_string()]);

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 1);
    let result = requests[1].turns.last().unwrap();
    assert_eq!(result.role, Role::Tool);
    assert!(matches!(&result.content, TurnContent::ToolResult(out) if out.output == "sunny"));

    assert_eq!(outcome.answer, "It is sunny.");
    assert_eq!(outcome.token_count, 32);
    let history = store.recent("u1", 10).await.unwrap();
    assert_eq!(history[0].answer, "It is sunny.");
    assert_eq!(
        endpoint.delivered(),
        vec![Delivered::Create {
            reply_to: Some(MessageId(9)),
            text: "It is sunny.".into()
        }]
    );
}

#[tokio::test]
async fn e2e_tool_trace_replays_paired_in_the_next_exchange() {
    let provider = Arc::new(ScriptedStream::new(vec![
        vec![fragment(Some("c1"), Some("lookup"), "{\"q\":\"weather\"}"), StreamEvent::End],
        vec![text("sunny"), StreamEvent::End],
        vec![text("still sunny"), StreamEvent::End],
    ]));
    let (tools, _) = registry_with_lookup();
    let store = Arc::new(InMemoryRecordStore::new());
    let runner = runner(
        provider.clone(),
        tools,
        store.clone(),
        Arc::new(ChatLog::default()),
        quiet_config(),
    );

    runner
        .run(target(), ExchangeRequest::new("u1", "weather?"))
        .await
        .unwrap();
    runner
        .run(target(), ExchangeRequest::new("u1", "and now?"))
        .await
        .unwrap();

    let third = &provider.requests()[2];
    let mut conversation = Conversation::new();
    conversation.extend(third.turns.clone());
    assert!(conversation.tool_calls_paired());
    assert!(conversation.ready_for_call());

    let roles: Vec<Role> = third.turns.iter().map(|t| t.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant, Role::User]
    );
}

#[tokio::test]
async fn e2e_loop_budget_counts_stream_calls() {
    let provider = Arc::new(ScriptedStream::forever(vec![
        fragment(Some("again"), Some("lookup"), "{\"q\":\"more\"}"),
        StreamEvent::End,
    ]));
    let (tools, lookup) = registry_with_lookup();
    let store = Arc::new(InMemoryRecordStore::new());
    let endpoint = Arc::new(ChatLog::default());
    let mut config = quiet_config();
    config.exchange.max_loop_depth = 4;
    let runner = runner(provider.clone(), tools, store.clone(), endpoint.clone(), config);

    let err = runner
        .run(target(), ExchangeRequest::new("u1", "loop forever"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TooManyLoops { max_depth: 4 }));
    assert!(err.to_string().contains("too many loops"));
    assert_eq!(provider.requests().len(), 4);
    assert_eq!(lookup.queries.lock().unwrap().len(), 4);
    assert_eq!(store.count().await, 0);
    // nothing streamed, so the fallback is shown
    assert_eq!(
        endpoint.delivered(),
        vec![Delivered::Create {
            reply_to: Some(MessageId(9)),
            text: "get nothing from the model!".into()
        }]
    );
}

#[tokio::test]
async fn e2e_empty_stream_shows_fallback_and_persists_empty_answer() {
    let provider = Arc::new(ScriptedStream::new(vec![vec![StreamEvent::End]]));
    let store = Arc::new(InMemoryRecordStore::new());
    let endpoint = Arc::new(ChatLog::default());
    let runner = runner(
        provider,
        Arc::new(ToolRegistry::new()),
        store.clone(),
        endpoint.clone(),
        AppConfig::default(),
    );

    let outcome = runner
        .run(target(), ExchangeRequest::new("u1", "hello?"))
        .await
        .unwrap();

    assert_eq!(outcome.answer, "");
    assert_eq!(store.count().await, 1);
    // empty answers are never replayed as history
    assert!(store.recent("u1", 10).await.unwrap()[0].answer.is_empty());

    let delivered = endpoint.delivered();
    assert_eq!(delivered.len(), 2);
    assert!(matches!(&delivered[0], Delivered::Create { text, .. } if text.contains("thinking")));
    assert_eq!(
        delivered[1],
        Delivered::Edit {
            id: MessageId(101),
            text: "get nothing from the model!".into()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn e2e_rate_limited_create_is_retried_after_the_delay() {
    let provider = Arc::new(ScriptedStream::new(vec![vec![text("4"), StreamEvent::End]]));
    let store = Arc::new(InMemoryRecordStore::new());
    let endpoint = Arc::new(ChatLog::rate_limited(1));
    let runner = runner(
        provider,
        Arc::new(ToolRegistry::new()),
        store,
        endpoint.clone(),
        quiet_config(),
    );

    let started = tokio::time::Instant::now();
    runner
        .run(target(), ExchangeRequest::new("u1", "What is 2+2?"))
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(endpoint.delivered().len(), 1);
}

#[tokio::test]
async fn e2e_long_answer_spans_segments() {
    let mut config = quiet_config();
    config.delivery.first_send_len = 5;
    config.delivery.steady_send_len = 10;
    config.delivery.max_message_len = 20;
    let chunks: Vec<StreamEvent> = (0..5)
        .map(|_| text("abcdefgh"))
        .chain(std::iter::once(StreamEvent::End))
        .collect();
    let provider = Arc::new(ScriptedStream::new(vec![chunks]));
    let store = Arc::new(InMemoryRecordStore::new());
    let endpoint = Arc::new(ChatLog::default());
    let runner = runner(
        provider,
        Arc::new(ToolRegistry::new()),
        store.clone(),
        endpoint.clone(),
        config,
    );

    let outcome = runner
        .run(target(), ExchangeRequest::new("u1", "long"))
        .await
        .unwrap();

    assert_eq!(outcome.answer.len(), 40);
    let creates = endpoint
        .delivered()
        .iter()
        .filter(|d| matches!(d, Delivered::Create { .. }))
        .count();
    assert!(creates >= 2, "expected a rollover, got {creates} messages");
    assert_eq!(store.recent("u1", 1).await.unwrap()[0].answer, outcome.answer);
}
