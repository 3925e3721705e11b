//! Google Gemini provider.
//!
//! Talks to the `generativelanguage` REST API. Unlike the delta backends,
//! every streamed `functionCall` part is a complete call, so fragments are
//! emitted with [`MergeMode::Replace`] under a running index. `usageMetadata`
//! is cumulative across chunks; only the last total is reported.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use streamrelay_core::error::ProviderError;
use streamrelay_core::memory::ExchangeRecord;
use streamrelay_core::message::{Role, Turn, TurnContent};
use streamrelay_core::provider::*;
use streamrelay_core::tool::ToolDefinition;
use tracing::{debug, trace};

use crate::sse::{self, Step};

pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com/v1beta";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client: crate::http_client(),
        }
    }

    /// Point the provider at a proxy or alternative deployment.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, model: &str, stream: bool) -> String {
        if stream {
            format!(
                "{}/models/{model}:streamGenerateContent?alt=sse&key={}",
                self.base_url, self.api_key
            )
        } else {
            format!("{}/models/{model}:generateContent?key={}", self.base_url, self.api_key)
        }
    }

    fn request_body(request: &ProviderRequest) -> GenerateRequest {
        let mut system = Vec::new();
        let mut contents = Vec::with_capacity(request.turns.len());

        for turn in &request.turns {
            match &turn.content {
                TurnContent::Text(text) if turn.role == Role::System => {
                    system.push(Part::text(text));
                }
                TurnContent::Text(text) => contents.push(Content {
                    role: if turn.role == Role::Assistant { "model" } else { "user" }.into(),
                    parts: vec![Part::text(text)],
                }),
                TurnContent::ToolCall(call) => contents.push(Content {
                    role: "model".into(),
                    parts: vec![Part {
                        function_call: Some(FunctionCall {
                            id: Some(call.id.clone()),
                            name: call.name.clone(),
                            args: serde_json::Value::Object(call.arguments.clone()),
                        }),
                        ..Part::default()
                    }],
                }),
                TurnContent::ToolResult(output) => contents.push(Content {
                    role: "user".into(),
                    parts: vec![Part {
                        function_response: Some(FunctionResponse {
                            id: Some(output.call_id.clone()),
                            name: output.name.clone(),
                            response: serde_json::json!({ "output": output.output }),
                        }),
                        ..Part::default()
                    }],
                }),
            }
        }

        let params = &request.params;
        GenerateRequest {
            contents,
            system_instruction: (!system.is_empty()).then(|| Content {
                role: "user".into(),
                parts: system,
            }),
            tools: if request.tools.is_empty() {
                Vec::new()
            } else {
                vec![ToolSet {
                    function_declarations: request.tools.iter().map(declaration).collect(),
                }]
            },
            generation_config: GenerationConfig {
                temperature: params.temperature,
                top_p: params.top_p,
                max_output_tokens: params.max_tokens,
                stop_sequences: params.stop.clone(),
                presence_penalty: params.presence_penalty,
                frequency_penalty: params.frequency_penalty,
            },
        }
    }

    async fn post(
        &self,
        request: &ProviderRequest,
        stream: bool,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(self.endpoint(&request.model, stream))
            .header("Content-Type", "application/json")
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(crate::network_error)?;
        crate::check_status("gemini", response).await
    }
}

/// Calls without parameters arrive with no `args` at all.
fn call_arguments(args: &serde_json::Value) -> String {
    if args.is_null() {
        "{}".to_string()
    } else {
        args.to_string()
    }
}

fn declaration(tool: &ToolDefinition) -> FunctionDeclaration {
    FunctionDeclaration {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: tool.parameters.clone(),
    }
}

/// Per-stream translation state.
#[derive(Default)]
struct ChunkTranslator {
    next_index: u32,
    reported_tokens: u64,
}

impl ChunkTranslator {
    fn translate(&mut self, chunk: GenerateResponse) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let parts = chunk
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .unwrap_or_default();

        for part in parts {
            if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::TextFragment(text));
            }
            if let Some(call) = part.function_call {
                events.push(StreamEvent::ToolCallFragment(ToolCallFragment {
                    index: self.next_index,
                    id: call.id.filter(|id| !id.is_empty()),
                    name: Some(call.name),
                    arguments: call_arguments(&call.args),
                    merge: MergeMode::Replace,
                }));
                self.next_index += 1;
            }
        }

        // Gemini usage totals are cumulative per stream: forward the growth.
        if let Some(usage) = chunk.usage_metadata {
            let total = u64::from(usage.total_token_count);
            let delta = total.saturating_sub(self.reported_tokens);
            if delta > 0 {
                self.reported_tokens = total;
                events.push(StreamEvent::UsageUpdate(delta));
            }
        }
        events
    }

    fn on_data(&mut self, data: &str) -> Option<(Vec<StreamEvent>, Step)> {
        match serde_json::from_str::<GenerateResponse>(data) {
            Ok(chunk) => Some((self.translate(chunk), Step::Continue)),
            Err(e) => {
                trace!(data = %data, error = %e, "Ignoring unparseable Gemini chunk");
                None
            }
        }
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete_turn(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        debug!(model = %request.model, "Sending Gemini completion request");
        let response = self.post(&request, false).await?;
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        let usage = body.usage_metadata.as_ref().map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for event in ChunkTranslator::default().translate(body) {
            match event {
                StreamEvent::TextFragment(t) => text.push_str(&t),
                StreamEvent::ToolCallFragment(f) => tool_calls.push(f),
                _ => {}
            }
        }

        Ok(ProviderResponse {
            text,
            tool_calls,
            usage,
            model: request.model,
        })
    }

    async fn stream_turn(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<tokio::sync::mpsc::Receiver<StreamEvent>, ProviderError> {
        debug!(model = %request.model, "Sending Gemini streaming request");
        let response = self.post(&request, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        tokio::spawn(async move {
            let mut translator = ChunkTranslator::default();
            let drained = sse::pump("gemini", response, &tx, StreamEvent::Error, |data| {
                translator.on_data(data)
            })
            .await;
            if drained {
                let _ = tx.send(StreamEvent::End).await;
            }
        });

        Ok(rx)
    }

    /// Gemini history replays question and answer only.
    fn history_to_turns(&self, records: &[ExchangeRecord]) -> Vec<Turn> {
        expand_history(records, false)
    }
}

// --- Gemini API types (internal) ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSet>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolSet {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    presence_penalty: f32,
    frequency_penalty: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}
