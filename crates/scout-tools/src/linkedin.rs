//! LinkedIn discovery through Apify's Google search actor.
//!
//! Results are raw search hits. They still need to go through
//! `validate_linkedin_url` before they count as confirmed profiles.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use scout_core::{Error, InputSchema, Tool, ToolKind};

const ACTOR_URL: &str =
    "https://api.apify.com/v2/acts/apify~google-search-scraper/run-sync-get-dataset-items";
const RESULTS_PER_PAGE: u32 = 10;

/// Which kind of LinkedIn page a search looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkedInTarget {
    Company,
    People,
}

impl LinkedInTarget {
    fn tool_name(self) -> &'static str {
        match self {
            LinkedInTarget::Company => "search_linkedin_company",
            LinkedInTarget::People => "search_linkedin_people",
        }
    }

    fn site(self) -> &'static str {
        match self {
            LinkedInTarget::Company => "linkedin.com/company",
            LinkedInTarget::People => "linkedin.com/in",
        }
    }

    /// Google query for the given input, or `None` if the subject is missing.
    fn query(self, input: &Value) -> Option<String> {
        let (subject, qualifier) = match self {
            LinkedInTarget::Company => ("company_name", "location"),
            LinkedInTarget::People => ("organization", "role"),
        };
        let subject = input.get(subject).and_then(Value::as_str)?.trim();
        if subject.is_empty() {
            return None;
        }

        let mut query = format!("site:{} \"{}\"", self.site(), subject);
        if let Some(extra) = input
            .get(qualifier)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            query.push(' ');
            query.push_str(extra);
        }
        Some(query)
    }
}

pub struct LinkedInSearchTool {
    target: LinkedInTarget,
    client: Client,
    token: String,
    endpoint: String,
}

impl LinkedInSearchTool {
    pub fn new(target: LinkedInTarget, token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target,
            // the actor runs synchronously and routinely takes longer than a page fetch
            client: crate::http_client(timeout * 3),
            token: token.into(),
            endpoint: ACTOR_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActorInput<'a> {
    queries: &'a str,
    max_pages_per_query: u32,
    results_per_page: u32,
    save_html: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPage {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
}

#[derive(Deserialize)]
struct OrganicResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

/// Keep hits that point at the searched LinkedIn section, once each.
fn collect_results(target: LinkedInTarget, pages: Vec<SearchPage>) -> Vec<Value> {
    let path = match target {
        LinkedInTarget::Company => "/company/",
        LinkedInTarget::People => "/in/",
    };

    let mut seen: Vec<String> = Vec::new();
    let mut results = Vec::new();
    for hit in pages.into_iter().flat_map(|p| p.organic_results) {
        if !hit.url.contains("linkedin.com") || !hit.url.contains(path) {
            continue;
        }
        let key = hit.url.trim_end_matches('/').to_lowercase();
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        results.push(json!({
            "url": hit.url,
            "title": hit.title,
            "snippet": hit.description,
        }));
    }
    results
}

#[async_trait]
impl Tool for LinkedInSearchTool {
    fn name(&self) -> &str {
        self.target.tool_name()
    }

    fn description(&self) -> &str {
        match self.target {
            LinkedInTarget::Company => {
                "Find LinkedIn company pages for an organization. \
                 Results are unverified search hits."
            }
            LinkedInTarget::People => {
                "Find LinkedIn profiles of people working for an organization. \
                 Results are unverified search hits."
            }
        }
    }

    fn input_schema(&self) -> InputSchema {
        match self.target {
            LinkedInTarget::Company => InputSchema::object()
                .property(
                    "company_name",
                    InputSchema::string("Name of the festival or organizing company"),
                )
                .property(
                    "location",
                    InputSchema::string("City or country to narrow the search").optional(),
                ),
            LinkedInTarget::People => InputSchema::object()
                .property(
                    "organization",
                    InputSchema::string("Festival or company the people work for"),
                )
                .property(
                    "role",
                    InputSchema::string("Job title to look for, e.g. \"booker\" or \"founder\"")
                        .optional(),
                ),
        }
    }

    fn kind(&self) -> ToolKind {
        ToolKind::EntitySearch
    }

    async fn run(&self, input: Value) -> Result<String, Error> {
        let name = self.target.tool_name();
        let query = self
            .target
            .query(&input)
            .ok_or_else(|| Error::tool(name, "Search subject must not be empty"))?;

        debug!(tool = name, query = %query, "Apify LinkedIn search");

        let body = ActorInput {
            queries: &query,
            max_pages_per_query: 1,
            results_per_page: RESULTS_PER_PAGE,
            save_html: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::tool(name, format!("Search request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::tool(name, format!("Apify error {}: {}", status, body)));
        }

        let pages: Vec<SearchPage> = response
            .json()
            .await
            .map_err(|e| Error::tool(name, format!("Failed to parse search results: {}", e)))?;

        let results = collect_results(self.target, pages);
        debug!(tool = name, hits = results.len(), "Apify LinkedIn search done");

        Ok(json!({ "query": query, "results": results }).to_string())
    }
}
