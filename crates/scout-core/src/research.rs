//! Research requests, the findings gathered while answering them, and the
//! terminal result.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::confidence::HIGH_CONFIDENCE;
use crate::error::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub festival_id: Option<String>,
    pub festival_name: String,
    pub target_info: Vec<String>,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default)]
    pub priority: Priority,
}

fn default_max_depth() -> u32 {
    2
}

impl ResearchQuery {
    pub fn new(festival_name: impl Into<String>) -> Self {
        Self {
            festival_id: None,
            festival_name: festival_name.into(),
            target_info: Vec::new(),
            max_depth: default_max_depth(),
            priority: Priority::Normal,
        }
    }

    pub fn with_festival_id(mut self, id: impl Into<String>) -> Self {
        self.festival_id = Some(id.into());
        self
    }

    pub fn with_target_info<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_info = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Check the query and return its normalized form.
    ///
    /// `festival_name` is trimmed and must be non-empty; `target_info` must
    /// contain at least one non-blank category and loses duplicate entries,
    /// keeping the first occurrence.
    pub fn validate(&self) -> Result<ResearchQuery, Error> {
        let name = self.festival_name.trim();
        if name.is_empty() {
            return Err(Error::validation("festivalName must not be empty"));
        }

        let mut targets: Vec<String> = Vec::with_capacity(self.target_info.len());
        for target in &self.target_info {
            let target = target.trim();
            if target.is_empty() {
                return Err(Error::validation("targetInfo entries must not be blank"));
            }
            if !targets.iter().any(|t| t == target) {
                targets.push(target.to_string());
            }
        }
        if targets.is_empty() {
            return Err(Error::validation("targetInfo must name at least one category"));
        }

        Ok(ResearchQuery {
            festival_id: self.festival_id.clone(),
            festival_name: name.to_string(),
            target_info: targets,
            max_depth: self.max_depth,
            priority: self.priority,
        })
    }
}

/// One confidence-scored observation derived from a single tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "type")]
    pub finding_type: String,
    pub data: Value,
    pub confidence: f64,
    pub source: String,
    pub timestamp: String,
}

impl Finding {
    /// Build a finding from a tool's raw output.
    ///
    /// Output that is not valid JSON is kept as a JSON string.
    pub fn from_tool_output(tool_name: &str, raw: &str, confidence: f64) -> Self {
        Self::new(tool_name, parse_payload(raw), confidence)
    }

    pub fn new(tool_name: &str, data: Value, confidence: f64) -> Self {
        Self {
            finding_type: tool_name.to_string(),
            data,
            confidence: confidence.clamp(0.0, 1.0),
            source: tool_name.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// The `error` field of the payload, if the tool reported one.
    pub fn error(&self) -> Option<&str> {
        self.data.get("error").and_then(Value::as_str)
    }
}

pub(crate) fn parse_payload(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileType {
    Company,
    Person,
    Event,
}

impl std::str::FromStr for ProfileType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "company" => Ok(ProfileType::Company),
            "person" => Ok(ProfileType::Person),
            "event" => Ok(ProfileType::Event),
            other => Err(Error::validation(format!("unknown profile type '{}'", other))),
        }
    }
}

/// A LinkedIn profile confirmed by the URL validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedInProfileRef {
    pub url: String,
    #[serde(rename = "type")]
    pub profile_type: ProfileType,
    pub name: String,
}

impl LinkedInProfileRef {
    /// Extract a profile from a validator payload that reports `isValid: true`.
    /// The payload must name a known profile `type`.
    pub fn from_validation(data: &Value) -> Option<Self> {
        if data.get("isValid").and_then(Value::as_bool) != Some(true) {
            return None;
        }
        let url = data.get("url").and_then(Value::as_str)?.to_string();
        let reported = data.get("type").and_then(Value::as_str);
        let Some(profile_type) = reported.and_then(|t| t.parse::<ProfileType>().ok()) else {
            debug!(
                url = %url,
                reported_type = ?reported,
                "Validated URL without a usable profile type"
            );
            return None;
        };
        let name = data
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| url.clone());

        Some(Self {
            url,
            profile_type,
            name,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub festival_id: Option<String>,
    pub festival_name: String,
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linkedin_profiles: Vec<LinkedInProfileRef>,
    pub status: ResearchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResearchResult {
    pub fn completed(
        query: &ResearchQuery,
        findings: Vec<Finding>,
        linkedin_profiles: Vec<LinkedInProfileRef>,
    ) -> Self {
        Self {
            festival_id: query.festival_id.clone(),
            festival_name: query.festival_name.clone(),
            findings,
            linkedin_profiles,
            status: ResearchStatus::Completed,
            error: None,
        }
    }

    pub fn failed(
        query: &ResearchQuery,
        findings: Vec<Finding>,
        linkedin_profiles: Vec<LinkedInProfileRef>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            festival_id: query.festival_id.clone(),
            festival_name: query.festival_name.clone(),
            findings,
            linkedin_profiles,
            status: ResearchStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ResearchStatus::Completed
    }

    /// Findings at or above `threshold`, in chronological order.
    pub fn findings_above(&self, threshold: f64) -> Vec<&Finding> {
        self.findings
            .iter()
            .filter(|f| f.confidence >= threshold)
            .collect()
    }

    pub fn high_confidence_findings(&self) -> Vec<&Finding> {
        self.findings_above(HIGH_CONFIDENCE)
    }
}
