//! Structured extraction from a single webpage.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use scout_core::{Error, InputSchema, Tool, ToolKind};

const TOOL_NAME: &str = "extract_webpage_data";
const EXCERPT_CHARS: usize = 2000;

const SOCIAL_HOSTS: &[(&str, &str)] = &[
    ("instagram.com", "instagram"),
    ("facebook.com", "facebook"),
    ("twitter.com", "x"),
    ("x.com", "x"),
    ("tiktok.com", "tiktok"),
    ("youtube.com", "youtube"),
    ("soundcloud.com", "soundcloud"),
    ("open.spotify.com", "spotify"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Focus {
    Social,
    Contact,
    #[default]
    All,
}

impl Focus {
    fn social(self) -> bool {
        matches!(self, Focus::Social | Focus::All)
    }

    fn contact(self) -> bool {
        matches!(self, Focus::Contact | Focus::All)
    }
}

#[derive(Deserialize)]
struct ExtractArgs {
    url: String,
    #[serde(default)]
    focus: Focus,
}

pub struct ExtractWebpageTool {
    client: Client,
}

impl ExtractWebpageTool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: crate::http_client(timeout),
        }
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn first_text(document: &Html, css: &str) -> Option<String> {
    let sel = selector(css)?;
    let text = clean_text(&document.select(&sel).next().map(|el| extract_text(&el))?);
    (!text.is_empty()).then_some(text)
}

fn meta_content(document: &Html, css: &str) -> Option<String> {
    let sel = selector(css)?;
    document
        .select(&sel)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

fn social_platform(host: &str) -> Option<&'static str> {
    let host = host.strip_prefix("www.").unwrap_or(host);
    SOCIAL_HOSTS
        .iter()
        .find(|(domain, _)| host == *domain || host.ends_with(&format!(".{}", domain)))
        .map(|(_, platform)| *platform)
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Turn fetched HTML into the tool payload.
fn extract_page(base: &Url, html: &str, focus: Focus) -> Value {
    let document = Html::parse_document(html);

    let title = first_text(&document, "title")
        .or_else(|| meta_content(&document, r#"meta[property="og:title"]"#))
        .unwrap_or_default();
    let description = meta_content(&document, r#"meta[name="description"]"#)
        .or_else(|| meta_content(&document, r#"meta[property="og:description"]"#))
        .unwrap_or_default();

    let mut linkedin_urls = Vec::new();
    let mut social_links: Vec<Value> = Vec::new();
    let mut emails = Vec::new();

    if let Some(anchors) = selector("a[href]") {
        for href in document.select(&anchors).filter_map(|a| a.value().attr("href")) {
            let href = href.trim();
            if let Some(address) = href.strip_prefix("mailto:") {
                let address = address.split('?').next().unwrap_or_default().trim();
                if focus.contact() && address.contains('@') {
                    push_unique(&mut emails, address.to_lowercase());
                }
                continue;
            }

            let Ok(link) = base.join(href) else { continue };
            let Some(host) = link.host_str() else { continue };

            if host == "linkedin.com" || host.ends_with(".linkedin.com") {
                if focus.social() {
                    push_unique(&mut linkedin_urls, link.to_string());
                }
            } else if let Some(platform) = social_platform(host) {
                let entry = json!({"platform": platform, "url": link.to_string()});
                if focus.social() && !social_links.contains(&entry) {
                    social_links.push(entry);
                }
            }
        }
    }

    let excerpt = if focus.contact() {
        let body = selector("main, article, #content, .content")
            .and_then(|sel| document.select(&sel).next())
            .or_else(|| selector("body").and_then(|sel| document.select(&sel).next()));
        let text = clean_text(&body.map(|el| extract_text(&el)).unwrap_or_default());
        truncate_chars(&text, EXCERPT_CHARS)
    } else {
        String::new()
    };

    json!({
        "success": true,
        "url": base.to_string(),
        "title": title,
        "description": description,
        "linkedinUrls": linkedin_urls,
        "socialLinks": social_links,
        "emails": emails,
        "textExcerpt": excerpt,
    })
}

/// Text content of an element, skipping non-content subtrees.
fn extract_text(element: &ElementRef) -> String {
    let mut text = String::new();
    collect_text(element, &mut text);
    text
}

fn collect_text(element: &ElementRef, out: &mut String) {
    if matches!(
        element.value().name(),
        "script" | "style" | "nav" | "footer" | "header" | "aside" | "noscript"
    ) {
        return;
    }

    for child in element.children() {
        if let Some(el) = ElementRef::wrap(child) {
            collect_text(&el, out);
        } else if let Some(t) = child.value().as_text() {
            let trimmed = t.trim();
            if !trimmed.is_empty() {
                if !out.is_empty() && !out.ends_with(' ') && !out.ends_with('\n') {
                    out.push(' ');
                }
                out.push_str(trimmed);
            }
        }
    }
}

/// Collapse runs of whitespace, keeping at most one blank line.
fn clean_text(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut prev_was_whitespace = false;
    let mut newline_count = 0;

    for ch in text.chars() {
        if ch == '\n' {
            newline_count += 1;
            if newline_count <= 2 {
                result.push('\n');
            }
            prev_was_whitespace = true;
        } else if ch.is_whitespace() {
            if !prev_was_whitespace {
                result.push(' ');
                prev_was_whitespace = true;
            }
            newline_count = 0;
        } else {
            result.push(ch);
            prev_was_whitespace = false;
            newline_count = 0;
        }
    }

    result.trim().to_string()
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[async_trait]
impl Tool for ExtractWebpageTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Fetch a webpage and extract its title, description, LinkedIn links, social media links, \
         contact emails and a text excerpt."
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::object()
            .property("url", InputSchema::string("Absolute http(s) URL of the page"))
            .property(
                "focus",
                InputSchema::enumeration(
                    "What to extract (default: all)",
                    ["social", "contact", "all"],
                )
                .optional(),
            )
    }

    fn kind(&self) -> ToolKind {
        ToolKind::PageExtractor
    }

    async fn run(&self, input: Value) -> Result<String, Error> {
        let args: ExtractArgs = serde_json::from_value(input)
            .map_err(|e| Error::tool(TOOL_NAME, format!("Invalid arguments: {}", e)))?;

        let url = Url::parse(args.url.trim())
            .map_err(|e| Error::tool(TOOL_NAME, format!("Invalid URL '{}': {}", args.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::tool(
                TOOL_NAME,
                format!("Unsupported URL scheme '{}'", url.scheme()),
            ));
        }

        debug!(url = %url, focus = ?args.focus, "Extracting webpage");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::tool(TOOL_NAME, format!("Failed to fetch '{}': {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::tool(
                TOOL_NAME,
                format!("HTTP error {}: {}", response.status(), url),
            ));
        }

        // Redirects may land on another host; resolve links against the final URL.
        let final_url = response.url().clone();
        let html = response
            .text()
            .await
            .map_err(|e| Error::tool(TOOL_NAME, format!("Failed to read response: {}", e)))?;

        Ok(extract_page(&final_url, &html, args.focus).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::serve_once;

    const PAGE: &str = r#"<html>
        <head>
            <title> Dour Festival 2025 </title>
            <meta name="description" content="Four days of music in Dour, Belgium.">
        </head>
        <body>
            <header><a href="/tickets">Tickets</a></header>
            <main>
                <p>Welcome to Dour.</p>
                <script>track()</script>
                <p>Booking: <a href="mailto:Booking@DourFestival.eu?subject=Hi">mail us</a></p>
            </main>
            <footer>
                <a href="https://www.linkedin.com/company/dour-festival/">LinkedIn</a>
                <a href="https://www.instagram.com/dourfestival">Instagram</a>
                <a href="https://instagram.com/dourfestival">Instagram again</a>
                <a href="https://x.com/dourfestival">X</a>
                <a href="https://www.instagram.com/dourfestival">Duplicate</a>
            </footer>
        </body>
    </html>"#;

    fn base() -> Url {
        Url::parse("https://www.dourfestival.eu/en/").unwrap()
    }

    #[test]
    fn test_extract_all() {
        let data = extract_page(&base(), PAGE, Focus::All);
        assert_eq!(data["success"], true);
        assert_eq!(data["title"], "Dour Festival 2025");
        assert_eq!(data["description"], "Four days of music in Dour, Belgium.");
        assert_eq!(
            data["linkedinUrls"],
            json!(["https://www.linkedin.com/company/dour-festival/"])
        );
        assert_eq!(data["socialLinks"].as_array().unwrap().len(), 3);
        assert_eq!(data["socialLinks"][2]["platform"], "x");
        assert_eq!(data["emails"], json!(["booking@dourfestival.eu"]));

        let excerpt = data["textExcerpt"].as_str().unwrap();
        assert!(excerpt.contains("Welcome to Dour."));
        assert!(!excerpt.contains("track()"));
    }

    #[test]
    fn test_focus_limits_output() {
        let social = extract_page(&base(), PAGE, Focus::Social);
        assert_eq!(social["emails"], json!([]));
        assert_eq!(social["textExcerpt"], "");
        assert_eq!(social["linkedinUrls"].as_array().unwrap().len(), 1);

        let contact = extract_page(&base(), PAGE, Focus::Contact);
        assert_eq!(contact["linkedinUrls"], json!([]));
        assert_eq!(contact["emails"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_og_fallbacks() {
        let html = r#"<html><head>
            <meta property="og:title" content="Pukkelpop">
            <meta property="og:description" content="Hasselt, Belgium">
        </head><body></body></html>"#;
        let data = extract_page(&base(), html, Focus::All);
        assert_eq!(data["title"], "Pukkelpop");
        assert_eq!(data["description"], "Hasselt, Belgium");
    }

    #[test]
    fn test_social_platform_matching() {
        assert_eq!(social_platform("www.facebook.com"), Some("facebook"));
        assert_eq!(social_platform("m.facebook.com"), Some("facebook"));
        assert_eq!(social_platform("notfacebook.com"), None);
        assert_eq!(social_platform("open.spotify.com"), Some("spotify"));
    }

    #[test]
    fn test_clean_text() {
        let cleaned = clean_text("  Hello   world  \n\n\n\n  Test  ");
        assert_eq!(cleaned, "Hello world \n\nTest");
    }

    #[test]
    fn test_truncate_chars_on_boundary() {
        assert_eq!(truncate_chars("Sziget", 10), "Sziget");
        assert_eq!(truncate_chars("Fête de la musique", 4), "Fête...");
    }

    #[tokio::test]
    async fn test_rejects_non_http_url() {
        let tool = ExtractWebpageTool::new(Duration::from_secs(1));
        let err = tool.run(json!({"url": "ftp://example.com"})).await.unwrap_err();
        assert!(err.to_string().contains("Unsupported URL scheme"));
    }

    #[tokio::test]
    async fn test_run_fetches_page() {
        let (url, request) = serve_once(200, "text/html; charset=utf-8", PAGE).await;
        let tool = ExtractWebpageTool::new(Duration::from_secs(5));

        let output = tool
            .run(json!({"url": format!("{}/en/", url), "focus": "social"}))
            .await
            .unwrap();

        let data: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(data["success"], true);
        assert_eq!(data["url"], format!("{}/en/", url));
        assert_eq!(data["title"], "Dour Festival 2025");
        assert_eq!(
            data["linkedinUrls"],
            json!(["https://www.linkedin.com/company/dour-festival/"])
        );
        assert_eq!(data["emails"], json!([]));
        assert!(request.await.unwrap().starts_with("GET /en/"));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let (url, _request) = serve_once(404, "text/html", "<h1>gone</h1>").await;
        let tool = ExtractWebpageTool::new(Duration::from_secs(5));

        let err = tool
            .run(json!({"url": format!("{}/missing", url)}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP error 404"));
    }
}
