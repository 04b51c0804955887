//! Anthropic Messages API provider.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, trace};

use scout_core::{
    CompletionRequest, CompletionResponse, Error, FinishReason, Message, Provider, Role,
    StreamChunk, StreamResult, ToolCall, ToolDefinition, Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: Option<String>,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: Some(DEFAULT_MODEL.to_string()),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    fn post_messages(&self, body: &MessagesRequest) -> RequestBuilder {
        self.client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(body)
    }

    fn build_request(&self, request: &CompletionRequest) -> MessagesRequest {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut messages: Vec<WireMessage> = Vec::new();

        for msg in &request.messages {
            match msg.role {
                Role::System => {
                    if !msg.content.is_empty() {
                        system_parts.push(&msg.content);
                    }
                }
                Role::User => messages.push(WireMessage {
                    role: "user",
                    content: text_blocks(&msg.content),
                }),
                Role::Assistant => messages.push(WireMessage {
                    role: "assistant",
                    content: assistant_blocks(msg),
                }),
                // Tool results travel back as user turns holding tool_result blocks.
                Role::Tool => messages.push(WireMessage {
                    role: "user",
                    content: vec![ContentBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.content.clone(),
                    }],
                }),
            }
        }

        MessagesRequest {
            model: request
                .model
                .clone()
                .or_else(|| self.default_model.clone())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            messages: merge_adjacent(messages),
            system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: request.temperature,
            stream: request.stream,
            tools: request.tools.iter().map(wire_tool).collect(),
        }
    }

    fn parse_response(&self, response: MessagesResponse) -> CompletionResponse {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in response.content {
            match block {
                ContentBlock::Text { text: part } => {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&part);
                }
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall::new(id, name, input));
                }
                ContentBlock::ToolResult { .. } => {}
            }
        }

        let finish_reason = match response.stop_reason.as_deref() {
            Some("tool_use") => FinishReason::ToolCalls,
            Some("max_tokens") => FinishReason::Length,
            _ => FinishReason::Stop,
        };

        CompletionResponse {
            message: Message::assistant_with_tool_calls(text, tool_calls),
            usage: Usage::new(response.usage.input_tokens, response.usage.output_tokens),
            model: response.model,
            finish_reason,
        }
    }
}

fn text_blocks(text: &str) -> Vec<ContentBlock> {
    if text.is_empty() {
        Vec::new()
    } else {
        vec![ContentBlock::Text {
            text: text.to_string(),
        }]
    }
}

fn assistant_blocks(msg: &Message) -> Vec<ContentBlock> {
    let mut blocks = text_blocks(&msg.content);
    blocks.extend(msg.tool_calls.iter().map(|tc| ContentBlock::ToolUse {
        id: tc.id.clone(),
        name: tc.name.clone(),
        input: tc.arguments.clone(),
    }));
    blocks
}

fn wire_tool(tool: &ToolDefinition) -> WireTool {
    WireTool {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: tool.input_schema.clone(),
    }
}

/// Anthropic requires user and assistant turns to alternate, so several tool
/// results for one assistant turn are folded into a single user message.
fn merge_adjacent(messages: Vec<WireMessage>) -> Vec<WireMessage> {
    let mut merged: Vec<WireMessage> = Vec::with_capacity(messages.len());
    for msg in messages {
        match merged.last_mut() {
            Some(last) if last.role == msg.role => last.content.extend(msg.content),
            _ => merged.push(msg),
        }
    }
    merged
}

fn parse_error(status: u16, body: &str) -> Error {
    #[derive(Deserialize)]
    struct ErrorEnvelope {
        error: ErrorDetail,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());

    match status {
        401 | 403 => Error::auth(message),
        429 | 529 => Error::rate_limit(message),
        400 => Error::invalid_request(message),
        _ => Error::api(status, message),
    }
}

/// What to do with one server-sent event.
#[derive(Debug)]
enum SseAction {
    Emit(StreamChunk),
    Fail(Error),
    Finish,
    Ignore,
}

/// Turns Anthropic's SSE events into provider-neutral chunks.
#[derive(Default)]
struct SseDecoder {
    input_tokens: u32,
}

impl SseDecoder {
    fn decode(&mut self, event: &str, data: &str) -> SseAction {
        match event {
            "message_start" => match serde_json::from_str::<MessageStartEvent>(data) {
                Ok(start) => {
                    self.input_tokens = start.message.usage.map(|u| u.input_tokens).unwrap_or(0);
                    SseAction::Emit(StreamChunk::Start {
                        model: start.message.model,
                    })
                }
                Err(e) => SseAction::Fail(Error::serialization(e.to_string())),
            },
            "content_block_start" => match serde_json::from_str::<BlockStartEvent>(data) {
                Ok(BlockStartEvent {
                    content_block:
                        BlockInfo {
                            block_type,
                            id: Some(id),
                            name: Some(name),
                        },
                }) if block_type == "tool_use" => {
                    SseAction::Emit(StreamChunk::ToolCallStart { id, name })
                }
                Ok(_) => SseAction::Ignore,
                Err(e) => SseAction::Fail(Error::serialization(e.to_string())),
            },
            "content_block_delta" => match serde_json::from_str::<BlockDeltaEvent>(data) {
                Ok(BlockDeltaEvent { delta }) => {
                    let BlockDelta {
                        delta_type,
                        text,
                        partial_json,
                    } = delta;
                    match (delta_type.as_str(), text, partial_json) {
                        ("text_delta", Some(text), _) if !text.is_empty() => {
                            SseAction::Emit(StreamChunk::Delta { content: text })
                        }
                        ("input_json_delta", _, Some(json)) if !json.is_empty() => {
                            SseAction::Emit(StreamChunk::ToolCallDelta { arguments: json })
                        }
                        _ => SseAction::Ignore,
                    }
                }
                Err(e) => SseAction::Fail(Error::serialization(e.to_string())),
            },
            "message_delta" => match serde_json::from_str::<MessageDeltaEvent>(data) {
                Ok(delta) => {
                    if let Some(reason) = &delta.delta.stop_reason {
                        debug!(stop_reason = %reason, "Anthropic stream message_delta");
                    }
                    let output = delta.usage.and_then(|u| u.output_tokens).unwrap_or(0);
                    SseAction::Emit(StreamChunk::Done {
                        usage: Some(Usage::new(self.input_tokens, output)),
                    })
                }
                Err(e) => SseAction::Fail(Error::serialization(e.to_string())),
            },
            "message_stop" => SseAction::Finish,
            "error" => SseAction::Fail(Error::stream(format!("Anthropic stream error: {}", data))),
            // ping keepalives and content_block_stop carry nothing we need
            _ => SseAction::Ignore,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        let mut body = self.build_request(&request);
        body.stream = false;

        debug!(
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.len(),
            "Anthropic request"
        );
        trace!(
            request = %serde_json::to_string(&body).unwrap_or_default(),
            "Anthropic request payload"
        );

        let response = self
            .post_messages(&body)
            .send()
            .await
            .map_err(|e| Error::network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::network(e.to_string()))?;

        if !status.is_success() {
            error!(status = status.as_u16(), body = %text, "Anthropic request failed");
            return Err(parse_error(status.as_u16(), &text));
        }
        trace!(response = %text, "Anthropic response payload");

        let parsed: MessagesResponse = serde_json::from_str(&text)?;
        let response = self.parse_response(parsed);

        debug!(
            model = %response.model,
            finish_reason = ?response.finish_reason,
            tool_calls = response.message.tool_calls.len(),
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "Anthropic response"
        );
        Ok(response)
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamResult, Error> {
        let mut body = self.build_request(&request);
        body.stream = true;

        debug!(
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.len(),
            "Anthropic stream request"
        );

        let mut source =
            EventSource::new(self.post_messages(&body)).map_err(|e| Error::stream(e.to_string()))?;
        let (tx, rx) = mpsc::channel::<Result<StreamChunk, Error>>(100);

        tokio::spawn(async move {
            let mut decoder = SseDecoder::default();

            while let Some(event) = source.next().await {
                let action = match event {
                    Ok(Event::Open) => {
                        debug!("Anthropic SSE connection opened");
                        continue;
                    }
                    Ok(Event::Message(msg)) => {
                        trace!(event_type = %msg.event, data = %msg.data, "Anthropic SSE event");
                        decoder.decode(&msg.event, &msg.data)
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => SseAction::Finish,
                    Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                        let body = response.text().await.unwrap_or_default();
                        error!(status = status.as_u16(), body = %body, "Anthropic stream rejected");
                        SseAction::Fail(parse_error(status.as_u16(), &body))
                    }
                    Err(e) => {
                        error!(error = %e, "Anthropic SSE error");
                        SseAction::Fail(Error::stream(e.to_string()))
                    }
                };

                match action {
                    SseAction::Emit(chunk) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            break;
                        }
                    }
                    SseAction::Fail(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                    SseAction::Finish => break,
                    SseAction::Ignore => {}
                }
            }

            source.close();
        });

        Ok(Box::pin(ReceiverStream::new(rx)) as StreamResult)
    }
}

// ── Anthropic API types ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

// ── Streaming event types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessageStartEvent {
    message: StartedMessage,
}

#[derive(Debug, Deserialize)]
struct StartedMessage {
    model: String,
    #[serde(default)]
    usage: Option<StartUsage>,
}

#[derive(Debug, Deserialize)]
struct StartUsage {
    input_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct BlockStartEvent {
    content_block: BlockInfo,
}

#[derive(Debug, Deserialize)]
struct BlockInfo {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockDeltaEvent {
    delta: BlockDelta,
}

#[derive(Debug, Deserialize)]
struct BlockDelta {
    #[serde(rename = "type")]
    delta_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    partial_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaEvent {
    delta: MessageDelta,
    #[serde(default)]
    usage: Option<DeltaUsage>,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    output_tokens: Option<u32>,
}
