//! Provider trait: the abstraction over LLM backends.
//!
//! A provider turns a normalized conversation into its own wire format,
//! issues the call, and yields a normalized sequence of [`StreamEvent`]s.
//! Tool-call fragments are surfaced raw; merging them is the accumulator's
//! job one layer up.
//!
//! Implementations: OpenAI-compatible (delta fragments) and Gemini
//! (structured, complete calls per event).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::ProviderError;
use crate::memory::ExchangeRecord;
use crate::message::{Conversation, Turn};
use crate::tool::ToolDefinition;

/// Sampling parameters shared by every backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Temperature (0.0 = deterministic, 2.0 = very creative)
    pub temperature: f32,

    /// Nucleus sampling threshold
    pub top_p: f32,

    pub frequency_penalty: f32,

    pub presence_penalty: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            max_tokens: None,
            stop: Vec::new(),
        }
    }
}

/// One provider call.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o-mini", "gemini-2.0-flash")
    pub model: String,

    /// The conversation so far
    pub turns: Vec<Turn>,

    pub params: GenerationParams,

    /// Available tools the model can call
    pub tools: Vec<ToolDefinition>,
}

/// How a backend's tool-call fragments combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeMode {
    /// Argument text arrives in pieces and is concatenated.
    Concatenate,
    /// Each fragment carries the whole call; the last one wins.
    Replace,
}

/// A piece of a tool call as it arrives on the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallFragment {
    /// Stream-assigned position of the call within this response
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    /// Argument text (a delta or the full text, per `merge`)
    pub arguments: String,
    pub merge: MergeMode,
}

/// A normalized streaming event.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextFragment(String),
    ToolCallFragment(ToolCallFragment),
    /// Tokens consumed by this call
    UsageUpdate(u64),
    End,
    /// Transport failure; terminates the sequence.
    Error(ProviderError),
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// Generated text
    pub text: String,

    /// Tool calls, one fragment per call carrying the full argument text
    pub tool_calls: Vec<ToolCallFragment>,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// The capability interface every backend implements.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "gemini").
    fn name(&self) -> &str;

    /// Issue the whole call with no intermediate events.
    async fn complete_turn(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Issue a streaming call.
    ///
    /// Default implementation calls `complete_turn()` and replays the result
    /// as a short event sequence ending in `End`.
    async fn stream_turn(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        let response = self.complete_turn(request).await?;
        let mut events = Vec::with_capacity(response.tool_calls.len() + 3);
        if !response.text.is_empty() {
            events.push(StreamEvent::TextFragment(response.text));
        }
        events.extend(response.tool_calls.into_iter().map(StreamEvent::ToolCallFragment));
        if let Some(usage) = response.usage {
            events.push(StreamEvent::UsageUpdate(u64::from(usage.total_tokens)));
        }
        events.push(StreamEvent::End);

        let (tx, rx) = mpsc::channel(events.len());
        for event in events {
            let _ = tx.try_send(event);
        }
        Ok(rx)
    }

    /// Turn stored records into conversation turns.
    fn history_to_turns(&self, records: &[ExchangeRecord]) -> Vec<Turn> {
        expand_history(records, true)
    }

    /// Append a turn to the conversation in the shape this backend expects.
    fn append_turn(&self, conversation: &mut Conversation, turn: Turn) {
        conversation.push(turn);
    }
}

/// Expand records into question / (tool trace) / answer turns.
///
/// Records with an empty question or answer are skipped. A trace that does
/// not decode into paired tool turns is dropped with a warning.
pub fn expand_history(records: &[ExchangeRecord], include_tool_trace: bool) -> Vec<Turn> {
    let mut turns = Vec::with_capacity(records.len() * 2);
    for record in records {
        if record.question.is_empty() || record.answer.is_empty() {
            continue;
        }
        turns.push(Turn::user(&record.question));

        if include_tool_trace && !record.tool_trace.is_empty() {
            match serde_json::from_str::<Vec<Turn>>(&record.tool_trace) {
                Ok(trace) => {
                    let mut check = Conversation::new();
                    check.extend(trace.iter().cloned());
                    if check.tool_calls_paired() {
                        turns.extend(trace);
                    } else {
                        warn!(record_id = record.id, "Dropping unpaired tool trace");
                    }
                }
                Err(e) => warn!(record_id = record.id, error = %e, "Ignoring undecodable tool trace"),
            }
        }

        turns.push(Turn::assistant(&record.answer));
    }
    turns
}
