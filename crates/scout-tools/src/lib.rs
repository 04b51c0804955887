//! Research tools for festival-scout.
//!
//! This crate provides the capabilities the research loop offers to the model:
//! - Web search (Perplexity)
//! - LinkedIn company and people discovery (Apify Google search actor)
//! - Webpage extraction
//! - LinkedIn URL validation

pub mod extract;
pub mod linkedin;
pub mod search;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_server;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use scout_core::Tool;

pub use extract::ExtractWebpageTool;
pub use linkedin::{LinkedInSearchTool, LinkedInTarget};
pub use search::WebSearchTool;
pub use validate::ValidateLinkedInUrlTool;

const USER_AGENT: &str = concat!("festival-scout/", env!("CARGO_PKG_VERSION"));

/// Credentials and knobs shared by the research tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub perplexity_api_key: Option<String>,
    pub perplexity_model: String,
    pub apify_token: Option<String>,
    /// Issue a GET against LinkedIn URLs that pass the structural check.
    pub check_reachability: bool,
    pub http_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            perplexity_api_key: None,
            perplexity_model: search::DEFAULT_MODEL.to_string(),
            apify_token: None,
            check_reachability: false,
            http_timeout_secs: 30,
        }
    }
}

impl ToolsConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }
}

pub(crate) fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

fn configured(key: &Option<String>) -> Option<&str> {
    key.as_deref().map(str::trim).filter(|k| !k.is_empty())
}

/// Build the research tool set.
///
/// Page extraction and URL validation are always present; the search tools
/// are only offered when their API key is configured.
pub fn create_research_tools(config: &ToolsConfig) -> Vec<Arc<dyn Tool>> {
    let timeout = config.http_timeout();
    let mut tools: Vec<Arc<dyn Tool>> = Vec::new();

    if let Some(key) = configured(&config.perplexity_api_key) {
        tools.push(Arc::new(WebSearchTool::new(key, &config.perplexity_model, timeout)));
    } else {
        debug!("No Perplexity key configured, web_search disabled");
    }

    if let Some(token) = configured(&config.apify_token) {
        tools.push(Arc::new(LinkedInSearchTool::new(
            LinkedInTarget::Company,
            token,
            timeout,
        )));
        tools.push(Arc::new(LinkedInSearchTool::new(
            LinkedInTarget::People,
            token,
            timeout,
        )));
    } else {
        debug!("No Apify token configured, LinkedIn search disabled");
    }

    tools.push(Arc::new(ExtractWebpageTool::new(timeout)));
    tools.push(Arc::new(ValidateLinkedInUrlTool::new(
        config.check_reachability,
        timeout,
    )));

    tools
}
