//! The research conversation loop.
//!
//! Each turn sends the full transcript and every registered tool to the
//! model, runs the tools it asks for in the order it asked, scores each
//! result, and feeds the raw output back. The loop ends when the model stops
//! asking for tools or the turn budget runs out.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::confidence;
use crate::error::Error;
use crate::events::{EventEmitter, OrchestratorEvent, Subscription};
use crate::message::{Message, StreamChunk, ToolCall};
use crate::prompt;
use crate::provider::{CompletionRequest, Provider};
use crate::research::{
    parse_payload, Finding, LinkedInProfileRef, Priority, ResearchQuery, ResearchResult,
};
use crate::tool::{ToolDefinition, ToolKind, ToolRegistry};

pub const DEFAULT_MAX_ITERATIONS: usize = 10;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Categories requested by [`Orchestrator::find_linkedin`].
pub const LINKEDIN_TARGETS: [&str; 2] = ["linkedin_company", "linkedin_organizers"];

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Model identifier; the provider's default when unset.
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Hard cap on model turns per research run.
    pub max_iterations: usize,
    /// Use the provider's streaming endpoint for each turn.
    pub enable_streaming: bool,
    /// Deadline for a whole research run.
    pub timeout: Option<Duration>,
    /// Replaces the built-in system prompt.
    pub system_prompt: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            enable_streaming: false,
            timeout: None,
            system_prompt: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.enable_streaming = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Everything accumulated during one run. Lives outside the loop future so
/// partial results survive a timeout.
#[derive(Default)]
struct RunState {
    findings: Vec<Finding>,
    profiles: Vec<LinkedInProfileRef>,
    turns: usize,
}

pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    config: OrchestratorConfig,
    events: EventEmitter,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            config,
            events: EventEmitter::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Observe progress of every run on this orchestrator.
    pub fn on_event<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&OrchestratorEvent) + Send + Sync + 'static,
    {
        self.events.on_event(handler)
    }

    /// Look for the LinkedIn presence of a festival and its organizers.
    pub async fn find_linkedin(
        &self,
        festival_name: &str,
        festival_id: Option<&str>,
    ) -> Result<ResearchResult, Error> {
        let mut query = ResearchQuery::new(festival_name)
            .with_target_info(LINKEDIN_TARGETS)
            .with_max_depth(2)
            .with_priority(Priority::High);
        query.festival_id = festival_id.map(str::to_string);
        self.research(&query).await
    }

    /// Run the research loop to completion.
    ///
    /// Only an invalid query is returned as `Err`, before any model turn.
    /// Everything that goes wrong afterwards yields a `failed` result that
    /// still carries the findings gathered so far.
    pub async fn research(&self, query: &ResearchQuery) -> Result<ResearchResult, Error> {
        let query = query.validate()?;

        info!(
            festival = %query.festival_name,
            targets = ?query.target_info,
            max_iterations = self.config.max_iterations,
            "Research starting"
        );
        self.events.emit(&OrchestratorEvent::Start {
            query: query.clone(),
        });

        let mut run = RunState::default();
        let outcome = match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, self.run_loop(&query, &mut run))
                .await
                .unwrap_or_else(|_| {
                    Err(Error::Timeout(format!(
                        "Research timed out after {}s",
                        limit.as_secs_f64()
                    )))
                }),
            None => self.run_loop(&query, &mut run).await,
        };

        let RunState {
            findings,
            profiles,
            turns,
        } = run;

        match outcome {
            Ok(()) => {
                info!(
                    festival = %query.festival_name,
                    turns,
                    findings = findings.len(),
                    profiles = profiles.len(),
                    "Research completed"
                );
                let result = ResearchResult::completed(&query, findings, profiles);
                self.events.emit(&OrchestratorEvent::Complete {
                    result: result.clone(),
                });
                Ok(result)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    festival = %query.festival_name,
                    turns,
                    findings = findings.len(),
                    error = %message,
                    "Research failed"
                );
                self.events.emit(&OrchestratorEvent::Error {
                    error: message.clone(),
                });
                Ok(ResearchResult::failed(&query, findings, profiles, message))
            }
        }
    }

    async fn run_loop(&self, query: &ResearchQuery, run: &mut RunState) -> Result<(), Error> {
        let tools = self.tools.definitions();
        let system = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(prompt::SYSTEM_PROMPT);
        let mut messages = vec![
            Message::system(system),
            Message::user(prompt::research_prompt(query)),
        ];

        while run.turns < self.config.max_iterations {
            run.turns += 1;
            debug!(
                turn = run.turns,
                provider = self.provider.name(),
                message_count = messages.len(),
                "Requesting model turn"
            );

            let request = self.build_request(messages.clone(), tools.clone());
            let (text, tool_calls) = if self.config.enable_streaming {
                self.streaming_turn(request).await?
            } else {
                self.complete_turn(request).await?
            };

            if !text.trim().is_empty() {
                self.events.emit(&OrchestratorEvent::Thinking { text: text.clone() });
            }

            if tool_calls.is_empty() {
                debug!(turn = run.turns, "Model finished without further tool use");
                return Ok(());
            }

            debug!(turn = run.turns, tool_count = tool_calls.len(), "Executing tools");
            messages.push(Message::assistant_with_tool_calls(text, tool_calls.clone()));

            for call in &tool_calls {
                let output = self.invoke(call, run).await;
                messages.push(Message::tool_result(&call.id, output));
            }
        }

        info!(
            max_iterations = self.config.max_iterations,
            "Turn budget exhausted"
        );
        Ok(())
    }

    fn build_request(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
    ) -> CompletionRequest {
        let mut request = CompletionRequest::new(messages)
            .with_tools(tools)
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.config.temperature)
            .with_stream(self.config.enable_streaming);
        if let Some(model) = &self.config.model {
            request = request.with_model(model.clone());
        }
        request
    }

    async fn complete_turn(
        &self,
        request: CompletionRequest,
    ) -> Result<(String, Vec<ToolCall>), Error> {
        let response = self.provider.complete(request).await?;
        debug!(
            model = %response.model,
            finish_reason = ?response.finish_reason,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "Model turn complete"
        );
        Ok((response.message.content, response.message.tool_calls))
    }

    async fn streaming_turn(
        &self,
        request: CompletionRequest,
    ) -> Result<(String, Vec<ToolCall>), Error> {
        let mut stream = self.provider.stream(request).await?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut pending: Option<(String, String, String)> = None;

        while let Some(chunk) = stream.next().await {
            match chunk? {
                StreamChunk::Start { model } => {
                    debug!(model = %model, "Model stream started");
                }
                StreamChunk::Delta { content } => text.push_str(&content),
                StreamChunk::ToolCallStart { id, name } => {
                    if let Some(call) = pending.take() {
                        tool_calls.push(finish_tool_call(call));
                    }
                    pending = Some((id, name, String::new()));
                }
                StreamChunk::ToolCallDelta { arguments } => {
                    if let Some((_, _, args)) = pending.as_mut() {
                        args.push_str(&arguments);
                    }
                }
                StreamChunk::Done { usage } => {
                    if let Some(usage) = usage {
                        debug!(
                            prompt_tokens = usage.prompt_tokens,
                            completion_tokens = usage.completion_tokens,
                            "Model stream finished"
                        );
                    }
                }
            }
        }

        if let Some(call) = pending.take() {
            tool_calls.push(finish_tool_call(call));
        }
        Ok((text, tool_calls))
    }

    /// Run one requested tool and fold its output into the run state.
    /// Returns the raw output for the transcript.
    async fn invoke(&self, call: &ToolCall, run: &mut RunState) -> String {
        self.events.emit(&OrchestratorEvent::ToolCall {
            tool: call.name.clone(),
            input: call.arguments.clone(),
        });

        let output = self.tools.execute(&call.name, call.arguments.clone()).await;

        self.events.emit(&OrchestratorEvent::ToolResult {
            tool: call.name.clone(),
            result: output.clone(),
        });

        let kind = self.tools.kind(&call.name);
        let data = parse_payload(&output);
        let score = confidence::estimate(kind, &data);
        let finding = Finding::new(&call.name, data, score);

        debug!(
            tool = %call.name,
            confidence = score,
            is_error = finding.error().is_some(),
            "Recorded finding"
        );

        if kind == ToolKind::UrlValidator {
            if let Some(profile) = LinkedInProfileRef::from_validation(&finding.data) {
                debug!(
                    url = %profile.url,
                    profile_type = ?profile.profile_type,
                    "Validated LinkedIn profile"
                );
                run.profiles.push(profile);
            }
        }

        self.events.emit(&OrchestratorEvent::Finding {
            finding: finding.clone(),
        });
        run.findings.push(finding);

        output
    }
}

/// Turn streamed argument fragments into a tool call. Empty arguments mean
/// an empty object; unparseable ones are passed on as a string so the
/// schema check reports them.
fn finish_tool_call((id, name, args): (String, String, String)) -> ToolCall {
    let arguments = if args.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str(&args).unwrap_or(Value::String(args))
    };
    ToolCall::new(id, name, arguments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockProvider, StaticTool};
    use serde_json::json;
    use std::sync::Mutex;

    fn orchestrator(provider: Arc<MockProvider>, config: OrchestratorConfig) -> Orchestrator {
        let tools = ToolRegistry::from_tools([
            Arc::new(StaticTool::new(
                "web_search",
                ToolKind::WebSearch,
                json!({"answer": "Tomorrowland is organized by We Are One World"}),
            )) as Arc<dyn crate::tool::Tool>,
        ])
        .unwrap();
        Orchestrator::new(provider, Arc::new(tools), config)
    }

    #[test]
    fn test_config_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_iterations, 10);
        assert!(!config.enable_streaming);
        assert!(config.timeout.is_none());
    }

    #[test]
    fn test_finish_tool_call_arguments() {
        let empty = finish_tool_call(("t1".into(), "web_search".into(), "".into()));
        assert_eq!(empty.arguments, json!({}));

        let parsed =
            finish_tool_call(("t2".into(), "web_search".into(), r#"{"query":"x"}"#.into()));
        assert_eq!(parsed.arguments["query"], "x");

        let broken = finish_tool_call(("t3".into(), "web_search".into(), "{\"query\"".into()));
        assert!(broken.arguments.is_string());
    }

    #[tokio::test]
    async fn test_request_carries_config_and_tools() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_response("Nothing to do.");
        let orch = orchestrator(
            Arc::clone(&provider),
            OrchestratorConfig::new()
                .with_model("claude-sonnet-4-20250514")
                .with_temperature(0.1)
                .with_max_tokens(1024),
        );

        let query = ResearchQuery::new("Tomorrowland").with_target_info(["website"]);
        orch.research(&query).await.unwrap();

        let request = provider.last_request().unwrap();
        assert_eq!(request.model.as_deref(), Some("claude-sonnet-4-20250514"));
        assert_eq!(request.temperature, Some(0.1));
        assert_eq!(request.max_tokens, Some(1024));
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.messages.len(), 2);
        assert!(request.messages[1].content.contains("Tomorrowland"));
    }

    #[tokio::test]
    async fn test_transcript_contains_tool_results() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_tool_calls(
            "Searching first.",
            vec![ToolCall::new(
                "toolu_1",
                "web_search",
                json!({"query": "Tomorrowland organizer"}),
            )],
        );
        provider.queue_response("Done.");
        let orch = orchestrator(Arc::clone(&provider), OrchestratorConfig::default());

        let query = ResearchQuery::new("Tomorrowland").with_target_info(["organizer"]);
        let result = orch.research(&query).await.unwrap();
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].confidence, confidence::WEB_SEARCH);

        let second = provider.last_request().unwrap();
        let last = second.messages.last().unwrap();
        assert_eq!(last.tool_call_id.as_deref(), Some("toolu_1"));
        assert!(last.content.contains("We Are One World"));
        let assistant = &second.messages[second.messages.len() - 2];
        assert_eq!(assistant.tool_calls[0].name, "web_search");
    }

    #[tokio::test]
    async fn test_streaming_turns() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_tool_calls(
            "Let me look.",
            vec![ToolCall::new("toolu_1", "web_search", json!({"query": "q"}))],
        );
        provider.queue_response("All done.");
        let orch = orchestrator(
            Arc::clone(&provider),
            OrchestratorConfig::new().with_streaming(true),
        );

        let thoughts = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&thoughts);
        let _sub = orch.on_event(move |event| {
            if let OrchestratorEvent::Thinking { text } = event {
                sink.lock().unwrap().push(text.clone());
            }
        });

        let query = ResearchQuery::new("Tomorrowland").with_target_info(["organizer"]);
        let result = orch.research(&query).await.unwrap();

        assert!(result.is_completed());
        assert_eq!(result.findings.len(), 1);
        assert!(provider.last_request().unwrap().stream);
        assert_eq!(*thoughts.lock().unwrap(), vec!["Let me look.", "All done."]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_partial_findings() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_tool_calls(
            "",
            vec![ToolCall::new("toolu_1", "web_search", json!({"query": "q"}))],
        );
        provider.set_delay_after(1, Duration::from_secs(60));
        provider.queue_response("never seen");
        let orch = orchestrator(
            Arc::clone(&provider),
            OrchestratorConfig::new().with_timeout(Duration::from_secs(5)),
        );

        let query = ResearchQuery::new("Tomorrowland").with_target_info(["organizer"]);
        let result = orch.research(&query).await.unwrap();

        assert!(!result.is_completed());
        assert_eq!(result.findings.len(), 1);
        assert!(result.error.unwrap().contains("timed out"));
    }
}
