//! Test utilities shared across the workspace.
//! Only compiled when running tests or with the `testing` feature.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;
use crate::message::{Message, StreamChunk, ToolCall, Usage};
use crate::provider::{CompletionRequest, CompletionResponse, FinishReason, Provider, StreamResult};
use crate::schema::InputSchema;
use crate::tool::{Tool, ToolKind};

enum Scripted {
    Reply(CompletionResponse),
    Fail(Error),
    /// Streams `content`, then fails. `complete` fails straight away.
    BrokenStream { content: String, error: Error },
}

/// A provider that replays queued responses in FIFO order.
pub struct MockProvider {
    responses: Mutex<VecDeque<Scripted>>,
    /// Returned whenever the queue is empty.
    fallback: Mutex<Option<CompletionResponse>>,
    delay: Mutex<Option<(usize, Duration)>>,
    /// Captured requests (for assertion).
    pub captured_requests: Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            delay: Mutex::new(None),
            captured_requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a plain text response with no tool calls.
    pub fn queue_response(&self, content: &str) {
        self.queue_raw_response(response(Message::assistant(content), FinishReason::Stop));
    }

    /// Queue a response that asks for the given tools.
    pub fn queue_tool_calls(&self, content: &str, calls: Vec<ToolCall>) {
        self.queue_raw_response(response(
            Message::assistant_with_tool_calls(content, calls),
            FinishReason::ToolCalls,
        ));
    }

    pub fn queue_raw_response(&self, response: CompletionResponse) {
        self.responses.lock().unwrap().push_back(Scripted::Reply(response));
    }

    /// Queue a failure for the next call.
    pub fn queue_error(&self, error: Error) {
        self.responses.lock().unwrap().push_back(Scripted::Fail(error));
    }

    /// Queue a streamed turn that sends `content` and then breaks off with `error`.
    pub fn queue_broken_stream(&self, content: &str, error: Error) {
        self.responses.lock().unwrap().push_back(Scripted::BrokenStream {
            content: content.to_string(),
            error,
        });
    }

    /// Answer every call past the queue with tool calls, so the model never stops.
    pub fn always_call_tools(&self, calls: Vec<ToolCall>) {
        *self.fallback.lock().unwrap() = Some(response(
            Message::assistant_with_tool_calls("", calls),
            FinishReason::ToolCalls,
        ));
    }

    /// Sleep for `delay` before answering every call after the first `calls`.
    pub fn set_delay_after(&self, calls: usize, delay: Duration) {
        *self.delay.lock().unwrap() = Some((calls, delay));
    }

    pub fn request_count(&self) -> usize {
        self.captured_requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.captured_requests.lock().unwrap().last().cloned()
    }

    async fn next(&self, request: CompletionRequest) -> Scripted {
        let seen = {
            let mut captured = self.captured_requests.lock().unwrap();
            captured.push(request);
            captured.len()
        };

        let delay = *self.delay.lock().unwrap();
        if let Some((after, duration)) = delay {
            if seen > after {
                tokio::time::sleep(duration).await;
            }
        }

        if let Some(next) = self.responses.lock().unwrap().pop_front() {
            return next;
        }
        match self.fallback.lock().unwrap().clone() {
            Some(response) => Scripted::Reply(response),
            None => Scripted::Fail(Error::invalid_request("No mock response queued")),
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn response(message: Message, finish_reason: FinishReason) -> CompletionResponse {
    CompletionResponse {
        message,
        usage: Usage::new(0, 0),
        model: "mock-model".to_string(),
        finish_reason,
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn default_model(&self) -> Option<&str> {
        None
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        match self.next(request).await {
            Scripted::Reply(response) => Ok(response),
            Scripted::Fail(error) | Scripted::BrokenStream { error, .. } => Err(error),
        }
    }

    /// Replays the next queued response as a chunk stream.
    async fn stream(&self, request: CompletionRequest) -> Result<StreamResult, Error> {
        let response = match self.next(request).await {
            Scripted::Reply(response) => response,
            Scripted::Fail(error) => return Err(error),
            Scripted::BrokenStream { content, error } => {
                let chunks = vec![
                    Ok(StreamChunk::Start {
                        model: "mock-model".to_string(),
                    }),
                    Ok(StreamChunk::Delta { content }),
                    Err(error),
                ];
                return Ok(Box::pin(futures::stream::iter(chunks)) as StreamResult);
            }
        };

        let mut chunks = vec![Ok(StreamChunk::Start {
            model: response.model.clone(),
        })];
        if !response.message.content.is_empty() {
            chunks.push(Ok(StreamChunk::Delta {
                content: response.message.content.clone(),
            }));
        }
        for call in response.message.tool_calls {
            chunks.push(Ok(StreamChunk::ToolCallStart {
                id: call.id,
                name: call.name,
            }));
            chunks.push(Ok(StreamChunk::ToolCallDelta {
                arguments: call.arguments.to_string(),
            }));
        }
        chunks.push(Ok(StreamChunk::Done {
            usage: Some(response.usage),
        }));

        Ok(Box::pin(futures::stream::iter(chunks)) as StreamResult)
    }
}

/// A tool that returns a fixed payload (or a fixed error) and records its inputs.
pub struct StaticTool {
    name: String,
    kind: ToolKind,
    output: Result<Value, String>,
    schema: InputSchema,
    /// Inputs the tool was run with, in order.
    pub calls: Mutex<Vec<Value>>,
}

impl StaticTool {
    pub fn new(name: impl Into<String>, kind: ToolKind, output: Value) -> Self {
        Self {
            name: name.into(),
            kind,
            output: Ok(output),
            schema: default_schema(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A tool whose `run` always returns `Err` with this message.
    pub fn failing(name: impl Into<String>, kind: ToolKind, message: impl Into<String>) -> Self {
        Self {
            output: Err(message.into()),
            ..Self::new(name, kind, Value::Null)
        }
    }

    pub fn with_schema(mut self, schema: InputSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

fn default_schema() -> InputSchema {
    InputSchema::object()
        .property("query", InputSchema::string("Search query").optional())
        .property("url", InputSchema::string("URL").optional())
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Static test tool"
    }

    fn input_schema(&self) -> InputSchema {
        self.schema.clone()
    }

    fn kind(&self) -> ToolKind {
        self.kind
    }

    async fn run(&self, input: Value) -> Result<String, Error> {
        self.calls.lock().unwrap().push(input);
        match &self.output {
            Ok(value) => Ok(value.to_string()),
            Err(message) => Err(Error::tool(self.name.clone(), message.clone())),
        }
    }
}
