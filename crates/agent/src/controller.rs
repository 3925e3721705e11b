//! The turn controller: drives one exchange from prompt to persisted answer.
//!
//! One exchange is a loop of provider streams:
//!
//! 1. **Start**: seed the conversation with the system prompt, the user's
//!    recent history and the new question
//! 2. **Stream**: forward text to the [`Outbox`], fold tool-call fragments
//!    into the [`ToolCallAccumulator`], count tokens
//! 3. **Execute tools**: run every complete call in index order and append
//!    call/result pairs to the conversation
//! 4. **Decide**: if a tool ran, stream again; otherwise persist and stop
//!
//! The loop is bounded by `exchange.max_loop_depth` stream calls.

use serde::Serialize;
use std::sync::Arc;
use streamrelay_config::AppConfig;
use streamrelay_core::delivery::NotificationSender;
use streamrelay_core::error::{Error, Result};
use streamrelay_core::memory::{HistoryLoader, NewRecord, PersistenceSink};
use streamrelay_core::message::{Conversation, Turn};
use streamrelay_core::metrics::{MetricsSink, NoopMetrics};
use streamrelay_core::provider::{Provider, ProviderRequest, StreamEvent};
use streamrelay_core::tool::{ToolCall, ToolInvoker, ToolOutput};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::accumulator::ToolCallAccumulator;
use crate::outbox::{Outbox, OutboxLimits};

/// A question from a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRequest {
    pub user_id: String,
    pub prompt: String,
}

impl ExchangeRequest {
    pub fn new(user_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            prompt: prompt.into(),
        }
    }
}

/// How an exchange ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeOutcome {
    /// Everything the model said, across all turns
    pub answer: String,
    pub token_count: u64,
    /// Provider calls made
    pub turns: u32,
    /// Executed tool-call/result pairs, in order
    pub tool_trace: Vec<Turn>,
    /// Id of the persisted record, when one was written
    pub record_id: Option<i64>,
}

impl ExchangeOutcome {
    /// Number of executed tool calls.
    pub fn tool_calls(&self) -> usize {
        self.tool_trace.iter().filter(|t| t.is_tool_call()).count()
    }
}

/// Runs exchanges against one provider and tool backend.
#[derive(Clone)]
pub struct TurnController {
    /// The LLM backend
    provider: Arc<dyn Provider>,

    /// Resolves and executes tool calls
    tools: Arc<dyn ToolInvoker>,

    /// Seeds each exchange with recent records
    history: Arc<dyn HistoryLoader>,

    /// Receives the finished record
    sink: Arc<dyn PersistenceSink>,

    /// Token counter and duration histogram
    metrics: Arc<dyn MetricsSink>,

    config: Arc<AppConfig>,
}

impl TurnController {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolInvoker>,
        history: Arc<dyn HistoryLoader>,
        sink: Arc<dyn PersistenceSink>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            provider,
            tools,
            history,
            sink,
            metrics: Arc::new(NoopMetrics),
            config,
        }
    }

    /// Report tokens and durations to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<dyn MetricsSink> {
        Arc::clone(&self.metrics)
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run one streaming exchange, handing partial answers to `sender`.
    ///
    /// Stream and tool failures are logged and never abort the exchange;
    /// the only error is [`Error::TooManyLoops`]. `sender` is dropped on
    /// return, which closes the delivery pipeline.
    pub async fn run(
        &self,
        request: &ExchangeRequest,
        sender: NotificationSender,
    ) -> Result<ExchangeOutcome> {
        let started = Instant::now();
        let user_id = request.user_id.as_str();
        let max_depth = self.config.exchange.max_loop_depth;
        let model = self.config.model_for(user_id).to_string();
        let params = self.config.generation.to_params();
        let definitions = self.tools.definitions();

        info!(
            user_id,
            model = %model,
            provider = self.provider.name(),
            "Starting exchange"
        );

        let mut conversation = self.start(request).await;
        let mut outbox = Outbox::new(sender, OutboxLimits::from(&self.config.delivery));
        let mut usage = 0u64;
        let mut trace = Vec::new();
        let mut turn = 0u32;

        loop {
            turn += 1;
            if turn > max_depth {
                warn!(user_id, max_depth, "Too many loops, abandoning exchange");
                return Err(Error::TooManyLoops { max_depth });
            }

            debug!(
                user_id,
                conversation = %conversation.id,
                turn,
                turns = conversation.len(),
                estimated_tokens = conversation.estimated_tokens(),
                "Streaming turn"
            );

            let provider_request = ProviderRequest {
                model: model.clone(),
                turns: conversation.turns.clone(),
                params: params.clone(),
                tools: definitions.clone(),
            };
            let calls = self
                .stream_once(turn, provider_request, &mut outbox, &mut usage)
                .await;
            let interim = outbox.finish_turn();

            if calls.is_empty() {
                break;
            }
            let executed = self
                .execute_tools(turn, calls, interim, &mut conversation, &mut trace)
                .await;
            if executed == 0 {
                break;
            }
        }

        debug!(user_id, notifications = outbox.notifications(), "Answer complete");
        let answer = outbox.into_whole_content();
        Ok(self
            .finish(request, answer, usage, trace, turn, started)
            .await)
    }

    /// One synchronous provider call with a single tool pass over its
    /// result. Nothing is persisted or delivered.
    pub async fn complete(&self, request: &ExchangeRequest) -> Result<ExchangeOutcome> {
        let mut conversation = self.start(request).await;
        let provider_request = ProviderRequest {
            model: self.config.model_for(&request.user_id).to_string(),
            turns: conversation.turns.clone(),
            params: self.config.generation.to_params(),
            tools: self.tools.definitions(),
        };

        let response = self.provider.complete_turn(provider_request).await?;
        let token_count = response
            .usage
            .map(|u| u64::from(u.total_tokens))
            .unwrap_or(0);
        if token_count > 0 {
            self.metrics.add_tokens(token_count);
        }

        let mut accumulator = ToolCallAccumulator::new();
        for fragment in response.tool_calls {
            accumulator.push(fragment);
        }
        let promoted = accumulator.promote();
        for e in &promoted.malformed {
            warn!(user_id = %request.user_id, error = %e, "Skipping tool call");
        }

        let mut trace = Vec::new();
        self.execute_tools(1, promoted.calls, String::new(), &mut conversation, &mut trace)
            .await;

        Ok(ExchangeOutcome {
            answer: response.text,
            token_count,
            turns: 1,
            tool_trace: trace,
            record_id: None,
        })
    }

    async fn start(&self, request: &ExchangeRequest) -> Conversation {
        let mut conversation = Conversation::new();

        if let Some(prompt) = self
            .config
            .system_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
        {
            conversation.push(Turn::system(prompt));
        }

        let limit = self.config.exchange.history_limit;
        if limit > 0 {
            match self.history.recent(&request.user_id, limit).await {
                Ok(records) => {
                    debug!(user_id = %request.user_id, records = records.len(), "Loaded history");
                    conversation.extend(self.provider.history_to_turns(&records));
                }
                Err(e) => {
                    warn!(user_id = %request.user_id, error = %e, "Could not load history, starting fresh");
                }
            }
        }

        self.provider
            .append_turn(&mut conversation, Turn::user(&request.prompt));
        conversation
    }

    /// Consume one stream. Returns the complete tool calls it produced.
    async fn stream_once(
        &self,
        turn: u32,
        request: ProviderRequest,
        outbox: &mut Outbox,
        usage: &mut u64,
    ) -> Vec<ToolCall> {
        let mut events = match self.provider.stream_turn(request).await {
            Ok(events) => events,
            Err(e) => {
                warn!(turn, error = %e, "Stream call failed");
                return Vec::new();
            }
        };

        let mut accumulator = ToolCallAccumulator::new();
        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::TextFragment(text) => outbox.send_msg(&text).await,
                StreamEvent::ToolCallFragment(fragment) => accumulator.push(fragment),
                StreamEvent::UsageUpdate(tokens) => {
                    *usage += tokens;
                    self.metrics.add_tokens(tokens);
                }
                StreamEvent::End => break,
                StreamEvent::Error(e) => {
                    warn!(turn, error = %e, "Stream ended with an error");
                    break;
                }
            }
        }
        outbox.flush_trailing().await;

        let promoted = accumulator.promote();
        for e in &promoted.malformed {
            warn!(turn, error = %e, "Skipping tool call");
        }
        promoted.calls
    }

    /// Run `calls` in order and append each call/result pair. Returns how
    /// many pairs were appended.
    async fn execute_tools(
        &self,
        turn: u32,
        calls: Vec<ToolCall>,
        interim: String,
        conversation: &mut Conversation,
        trace: &mut Vec<Turn>,
    ) -> usize {
        let mut pairs = Vec::with_capacity(calls.len() * 2);

        for call in calls {
            let result = match self.tools.resolve(&call.name) {
                Ok(executor) => executor.execute(&call.name, &call.arguments).await,
                Err(e) => Err(e),
            };

            let output = match result {
                Ok(output) => {
                    info!(turn, tool = %call.name, call_id = %call.id, "Tool executed");
                    output
                }
                Err(e) if self.config.exchange.report_tool_errors => {
                    warn!(turn, tool = %call.name, error = %e, "Tool call failed, reporting it");
                    format!("error: {e}")
                }
                Err(e) => {
                    warn!(turn, tool = %call.name, error = %e, "Tool call failed, omitting it");
                    continue;
                }
            };

            let result = ToolOutput {
                call_id: call.id.clone(),
                name: call.name.clone(),
                output,
            };
            pairs.push(Turn::tool_call(call));
            pairs.push(Turn::tool_result(result));
        }

        if pairs.is_empty() {
            return 0;
        }

        if !interim.trim().is_empty() {
            self.provider
                .append_turn(conversation, Turn::assistant(interim));
        }
        trace.extend(pairs.iter().cloned());
        let executed = pairs.len() / 2;
        for pair in pairs {
            self.provider.append_turn(conversation, pair);
        }
        executed
    }

    async fn finish(
        &self,
        request: &ExchangeRequest,
        answer: String,
        token_count: u64,
        tool_trace: Vec<Turn>,
        turns: u32,
        started: Instant,
    ) -> ExchangeOutcome {
        let trace_json = if tool_trace.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&tool_trace).unwrap_or_else(|e| {
                warn!(error = %e, "Could not encode tool trace");
                String::new()
            })
        };

        let record = NewRecord {
            question: request.prompt.clone(),
            answer: answer.clone(),
            tool_trace: trace_json,
            token_count,
        };
        let record_id = match self.sink.insert_record(&request.user_id, record, true).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(user_id = %request.user_id, error = %e, "Failed to persist exchange");
                None
            }
        };

        let elapsed = started.elapsed().as_secs_f64();
        self.metrics.observe_exchange_duration(elapsed);
        info!(
            user_id = %request.user_id,
            turns,
            tokens = token_count,
            elapsed_secs = elapsed,
            "Exchange finished"
        );

        ExchangeOutcome {
            answer,
            token_count,
            turns,
            tool_trace,
            record_id,
        }
    }
}
