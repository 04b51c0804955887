//! Heuristic confidence scores for tool payloads.
//!
//! Validated facts outrank raw search hits, and unvalidated LinkedIn hits sit
//! below the [`HIGH_CONFIDENCE`] cut-off until a validation call confirms them.

use serde_json::Value;

use crate::tool::ToolKind;

/// Findings at or above this score count as high confidence.
pub const HIGH_CONFIDENCE: f64 = 0.8;

pub const VALIDATED_URL: f64 = 0.95;
pub const EXTRACTED_PAGE: f64 = 0.85;
pub const WEB_SEARCH: f64 = 0.70;
pub const ENTITY_SEARCH: f64 = 0.60;
pub const DEFAULT: f64 = 0.50;

/// Score a tool payload. Rules are checked top to bottom; the first match wins.
pub fn estimate(kind: ToolKind, data: &Value) -> f64 {
    if data.get("error").is_some() {
        return DEFAULT;
    }

    match kind {
        ToolKind::UrlValidator if flag(data, "isValid") => VALIDATED_URL,
        ToolKind::PageExtractor if flag(data, "success") => EXTRACTED_PAGE,
        ToolKind::WebSearch => WEB_SEARCH,
        ToolKind::EntitySearch => ENTITY_SEARCH,
        _ => DEFAULT,
    }
}

fn flag(data: &Value, key: &str) -> bool {
    data.get(key).and_then(Value::as_bool).unwrap_or(false)
}
