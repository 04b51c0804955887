//! LinkedIn URL validation.
//!
//! A URL is valid when it has the shape of a LinkedIn company, person or event
//! page. With reachability checks enabled the page is also fetched; LinkedIn
//! answers unauthenticated clients with status 999, which counts as reachable.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use scout_core::{Error, InputSchema, ProfileType, Tool, ToolKind};

const TOOL_NAME: &str = "validate_linkedin_url";

/// LinkedIn's status for requests it refuses to serve to bots.
const LINKEDIN_BOT_WALL: u16 = 999;

#[derive(Debug, Clone, PartialEq)]
struct Validation {
    url: String,
    profile_type: Option<ProfileType>,
    name: String,
    reason: Option<String>,
    status_code: Option<u16>,
}

impl Validation {
    fn invalid(url: &str, reason: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            profile_type: None,
            name: String::new(),
            reason: Some(reason.into()),
            status_code: None,
        }
    }

    fn is_valid(&self) -> bool {
        self.profile_type.is_some() && self.reason.is_none()
    }

    fn reject(&mut self, reason: impl Into<String>) {
        self.profile_type = None;
        self.reason = Some(reason.into());
    }

    fn to_payload(&self) -> Value {
        let mut payload = json!({
            "url": self.url,
            "isValid": self.is_valid(),
            "type": self.profile_type,
            "name": self.name,
        });
        if let Some(reason) = &self.reason {
            payload["reason"] = json!(reason);
        }
        if let Some(status) = self.status_code {
            payload["statusCode"] = json!(status);
        }
        payload
    }
}

fn section_type(section: &str) -> Option<ProfileType> {
    match section {
        "company" | "school" | "showcase" => Some(ProfileType::Company),
        "in" => Some(ProfileType::Person),
        "events" => Some(ProfileType::Event),
        _ => None,
    }
}

/// Readable name from a URL slug: `dour-festival` becomes `Dour Festival`.
/// Trailing parts containing digits (LinkedIn's disambiguation ids) are dropped.
fn name_from_slug(slug: &str) -> String {
    let mut parts: Vec<&str> = slug
        .split(|c: char| c == '-' || c == '_')
        .filter(|p| !p.is_empty())
        .collect();
    while parts.len() > 1 && parts.last().is_some_and(|p| p.chars().any(|c| c.is_ascii_digit())) {
        parts.pop();
    }
    parts
        .iter()
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Structural check, without touching the network.
fn classify(raw: &str, expected: Option<ProfileType>) -> Validation {
    let trimmed = raw.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let url = match Url::parse(&candidate) {
        Ok(url) => url,
        Err(e) => return Validation::invalid(trimmed, format!("Not a URL: {}", e)),
    };
    if !matches!(url.scheme(), "http" | "https") {
        return Validation::invalid(trimmed, format!("Unsupported scheme '{}'", url.scheme()));
    }

    let host = url.host_str().unwrap_or_default().to_lowercase();
    if host != "linkedin.com" && !host.ends_with(".linkedin.com") {
        return Validation::invalid(trimmed, format!("Not a LinkedIn host: {}", host));
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    let (section, slug) = match segments.as_slice() {
        [section, slug, ..] => (*section, *slug),
        _ => {
            return Validation::invalid(trimmed, "URL does not point at a LinkedIn page");
        }
    };

    let Some(profile_type) = section_type(section) else {
        return Validation::invalid(
            trimmed,
            format!("Unsupported LinkedIn section '/{}/'", section),
        );
    };

    let canonical = format!("https://www.linkedin.com/{}/{}/", section, slug);
    if let Some(expected) = expected {
        if expected != profile_type {
            let mut validation = Validation::invalid(
                &canonical,
                format!(
                    "Expected a {} page, found a {} page",
                    type_label(expected),
                    type_label(profile_type)
                ),
            );
            validation.name = name_from_slug(slug);
            return validation;
        }
    }

    Validation {
        url: canonical,
        profile_type: Some(profile_type),
        name: name_from_slug(slug),
        reason: None,
        status_code: None,
    }
}

fn type_label(profile_type: ProfileType) -> &'static str {
    match profile_type {
        ProfileType::Company => "company",
        ProfileType::Person => "person",
        ProfileType::Event => "event",
    }
}

/// Fold an HTTP status from the reachability check into the result.
fn apply_status(validation: &mut Validation, status: StatusCode) {
    validation.status_code = Some(status.as_u16());
    if status.is_success() || status.as_u16() == LINKEDIN_BOT_WALL {
        return;
    }
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        validation.reject("LinkedIn page not found");
    }
}

#[derive(Deserialize)]
struct ValidateArgs {
    url: String,
    #[serde(default)]
    expected_type: Option<ProfileType>,
}

pub struct ValidateLinkedInUrlTool {
    client: Client,
    check_reachability: bool,
}

impl ValidateLinkedInUrlTool {
    pub fn new(check_reachability: bool, timeout: Duration) -> Self {
        Self {
            client: crate::http_client(timeout),
            check_reachability,
        }
    }
}

#[async_trait]
impl Tool for ValidateLinkedInUrlTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Check that a URL is a real LinkedIn company, person or event page. \
         Only URLs that pass this check should be reported as LinkedIn profiles."
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::object()
            .property("url", InputSchema::string("The LinkedIn URL to check"))
            .property(
                "expected_type",
                InputSchema::enumeration(
                    "Kind of page the URL should be",
                    ["company", "person", "event"],
                )
                .optional(),
            )
    }

    fn kind(&self) -> ToolKind {
        ToolKind::UrlValidator
    }

    async fn run(&self, input: Value) -> Result<String, Error> {
        let args: ValidateArgs = serde_json::from_value(input)
            .map_err(|e| Error::tool(TOOL_NAME, format!("Invalid arguments: {}", e)))?;

        let mut validation = classify(&args.url, args.expected_type);

        if validation.is_valid() && self.check_reachability {
            match self.client.get(&validation.url).send().await {
                Ok(response) => apply_status(&mut validation, response.status()),
                Err(e) => {
                    warn!(url = %validation.url, error = %e, "LinkedIn reachability check failed");
                    return Err(Error::tool(
                        TOOL_NAME,
                        format!("Could not reach {}: {}", validation.url, e),
                    ));
                }
            }
        }

        debug!(
            url = %validation.url,
            valid = validation.is_valid(),
            reason = validation.reason.as_deref().unwrap_or(""),
            "LinkedIn URL validated"
        );
        Ok(validation.to_payload().to_string())
    }
}
