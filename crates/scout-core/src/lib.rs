//! scout-core: the festival research orchestrator
//!
//! This crate drives a tool-calling language model through an iterative
//! search → validate → synthesize loop and turns every tool call into a
//! confidence-scored finding.

pub mod confidence;
pub mod error;
pub mod events;
pub mod message;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
pub mod research;
pub mod schema;
pub mod tool;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use confidence::HIGH_CONFIDENCE;
pub use error::Error;
pub use events::{EventEmitter, OrchestratorEvent, Subscription};
pub use message::{Message, Role, StreamChunk, ToolCall, Usage};
pub use orchestrator::{Orchestrator, OrchestratorConfig, DEFAULT_MAX_ITERATIONS};
pub use provider::{CompletionRequest, CompletionResponse, FinishReason, Provider, StreamResult};
pub use research::{
    Finding, LinkedInProfileRef, Priority, ProfileType, ResearchQuery, ResearchResult,
    ResearchStatus,
};
pub use schema::{InputSchema, SchemaError};
pub use tool::{error_payload, Tool, ToolDefinition, ToolKind, ToolRegistry};

pub type Result<T> = std::result::Result<T, Error>;
