//! Web search through Perplexity's chat completions API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use scout_core::{Error, InputSchema, Tool, ToolKind};

const API_URL: &str = "https://api.perplexity.ai/chat/completions";
pub const DEFAULT_MODEL: &str = "sonar";
const DEFAULT_MAX_RESULTS: usize = 10;

const SEARCH_INSTRUCTIONS: &str = "You are a search engine. Answer factually and concisely. \
Include official URLs (websites, social media, LinkedIn) whenever they appear in your sources.";

pub struct WebSearchTool {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl WebSearchTool {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: crate::http_client(timeout),
            api_key: api_key.into(),
            model: model.into(),
            endpoint: API_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Deserialize)]
struct WebSearchArgs {
    query: String,
    #[serde(default)]
    max_results: Option<usize>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

fn search_payload(query: &str, response: ChatResponse, max_results: usize) -> Value {
    let answer = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .unwrap_or_default();

    let mut citations: Vec<String> = Vec::new();
    for url in response.citations {
        if !citations.contains(&url) {
            citations.push(url);
        }
    }
    citations.truncate(max_results);

    json!({
        "query": query,
        "answer": answer,
        "citations": citations,
    })
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web with a natural language query. \
         Returns a synthesized answer and the URLs it cites."
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::object()
            .property("query", InputSchema::string("The search query"))
            .property(
                "max_results",
                InputSchema::integer("Maximum number of citations to return (default 10)")
                    .optional(),
            )
    }

    fn kind(&self) -> ToolKind {
        ToolKind::WebSearch
    }

    async fn run(&self, input: Value) -> Result<String, Error> {
        let args: WebSearchArgs = serde_json::from_value(input)
            .map_err(|e| Error::tool("web_search", format!("Invalid arguments: {}", e)))?;

        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SEARCH_INSTRUCTIONS,
                },
                ChatMessage {
                    role: "user",
                    content: &args.query,
                },
            ],
        };

        debug!(query = %args.query, model = %self.model, "Perplexity search");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::tool("web_search", format!("Search request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::tool(
                "web_search",
                format!("Search API error {}: {}", status, body),
            ));
        }

        let result: ChatResponse = response.json().await.map_err(|e| {
            Error::tool("web_search", format!("Failed to parse search response: {}", e))
        })?;

        let payload = search_payload(
            &args.query,
            result,
            args.max_results.unwrap_or(DEFAULT_MAX_RESULTS).max(1),
        );
        Ok(payload.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::serve_once;
    use scout_core::ToolRegistry;
    use std::sync::Arc;

    #[test]
    fn test_search_payload_shape() {
        let response: ChatResponse = serde_json::from_value(json!({
            "id": "abc",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Sziget takes place in Budapest."}
            }],
            "citations": [
                "https://szigetfestival.com",
                "https://en.wikipedia.org/wiki/Sziget_Festival",
                "https://szigetfestival.com"
            ]
        }))
        .unwrap();

        let payload = search_payload("Sziget festival", response, 10);
        assert_eq!(payload["query"], "Sziget festival");
        assert_eq!(payload["answer"], "Sziget takes place in Budapest.");
        assert_eq!(payload["citations"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_citations_truncated() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [],
            "citations": ["https://a.example", "https://b.example", "https://c.example"]
        }))
        .unwrap();

        let payload = search_payload("q", response, 1);
        assert_eq!(payload["answer"], "");
        assert_eq!(payload["citations"], json!(["https://a.example"]));
    }

    #[test]
    fn test_schema_requires_query() {
        let tool = WebSearchTool::new("key", DEFAULT_MODEL, Duration::from_secs(5));
        let schema = tool.input_schema();
        assert_eq!(schema.required_fields(), vec!["query"]);
        assert!(schema.validate(&json!({"query": "Primavera Sound"})).is_ok());
        assert!(schema.validate(&json!({})).is_err());
    }

    #[tokio::test]
    async fn test_run_against_api() {
        let body = json!({
            "choices": [{"message": {"content": "Melt takes place in Gräfenhainichen."}}],
            "citations": ["https://meltfestival.de", "https://meltfestival.de"]
        })
        .to_string();
        let (url, request) = serve_once(200, "application/json", &body).await;

        let tool = WebSearchTool::new("pplx-key", "sonar-pro", Duration::from_secs(5))
            .with_endpoint(format!("{}/chat/completions", url));
        let output = tool.run(json!({"query": "Melt festival"})).await.unwrap();

        let payload: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(payload["query"], "Melt festival");
        assert_eq!(payload["answer"], "Melt takes place in Gräfenhainichen.");
        assert_eq!(payload["citations"], json!(["https://meltfestival.de"]));

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /chat/completions"));
        assert!(request.to_lowercase().contains("authorization: bearer pplx-key"));
        assert!(request.contains(r#""model":"sonar-pro""#));
    }

    #[tokio::test]
    async fn test_api_error_becomes_error_payload() {
        let (url, _request) = serve_once(500, "text/plain", "upstream down").await;
        let tool = WebSearchTool::new("pplx-key", DEFAULT_MODEL, Duration::from_secs(5))
            .with_endpoint(url);

        let registry = ToolRegistry::from_tools([Arc::new(tool) as Arc<dyn Tool>]).unwrap();
        let output = registry
            .execute("web_search", json!({"query": "Melt festival"}))
            .await;

        let payload: Value = serde_json::from_str(&output).unwrap();
        let message = payload["error"].as_str().unwrap();
        assert!(message.contains("Search API error 500"));
        assert!(message.contains("upstream down"));
    }
}
