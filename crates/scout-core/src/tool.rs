use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Error;
use crate::schema::InputSchema;

/// What a tool does, as far as confidence scoring is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Confirms that a profile URL exists and has the expected shape.
    UrlValidator,
    /// Pulls structured data out of a single webpage.
    PageExtractor,
    /// General-purpose web search.
    WebSearch,
    /// Search restricted to LinkedIn entities; results are unvalidated.
    EntitySearch,
    Other,
}

/// Model-facing description of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn input_schema(&self) -> InputSchema;

    fn kind(&self) -> ToolKind {
        ToolKind::Other
    }

    /// Run the tool on already-validated input and return JSON text.
    ///
    /// An `Err` is not fatal: the registry turns it into an `{"error": ...}`
    /// payload that is handed back to the model.
    async fn run(&self, input: Value) -> Result<String, Error>;
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    schema: InputSchema,
    definition: ToolDefinition,
}

/// The fixed set of capabilities offered to the model.
///
/// Read-only once built, so one registry can be shared by concurrent
/// research runs behind an `Arc`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of tools, failing on the first duplicate.
    pub fn from_tools(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Result<Self, Error> {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), Error> {
        let name = tool.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(Error::DuplicateTool(name));
        }

        let schema = tool.input_schema();
        let definition = ToolDefinition {
            name: name.clone(),
            description: tool.description().to_string(),
            input_schema: schema.to_json_schema(),
        };

        self.by_name.insert(name, self.tools.len());
        self.tools.push(RegisteredTool {
            tool,
            schema,
            definition,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.entry(name).map(|t| t.tool.as_ref())
    }

    fn entry(&self, name: &str) -> Option<&RegisteredTool> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    /// Kind of the named tool; unknown names are `ToolKind::Other`.
    pub fn kind(&self, name: &str) -> ToolKind {
        self.get(name).map(|t| t.kind()).unwrap_or(ToolKind::Other)
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.definition.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Invoke a tool by name.
    ///
    /// Never fails: unknown names, invalid input, tool errors and panics all
    /// come back as an `{"error": "..."}` JSON string.
    pub async fn execute(&self, name: &str, input: Value) -> String {
        let Some(entry) = self.entry(name) else {
            debug!(tool = %name, "Unknown tool requested");
            return error_payload(format!("Unknown tool: {}", name));
        };

        if let Err(e) = entry.schema.validate(&input) {
            debug!(tool = %name, error = %e, "Tool input rejected");
            return error_payload(format!("Invalid input for {}: {}", name, e));
        }

        match AssertUnwindSafe(entry.tool.run(input)).catch_unwind().await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(tool = %name, error = %e, "Tool failed");
                error_payload(tool_error_message(e))
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "tool panicked".to_string());
                warn!(tool = %name, panic = %message, "Tool panicked");
                error_payload(message)
            }
        }
    }
}

/// Encode a failure the way tools report it to the model.
pub fn error_payload(message: impl Into<String>) -> String {
    serde_json::json!({ "error": message.into() }).to_string()
}

fn tool_error_message(err: Error) -> String {
    match err {
        Error::Tool { message, .. } => message,
        other => other.to_string(),
    }
}
