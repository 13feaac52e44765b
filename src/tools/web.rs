//! Built-in web tools: SerpAPI search and page scraping.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{Map, Value, json};

use crate::error::ToolError;
use crate::llm::http_client;
use crate::tools::Tool;

const SERPAPI_ENDPOINT: &str = "https://serpapi.com/search.json";
const SERPAPI_KEY_ENV: &str = "SERPAPI_KEY";
const DEFAULT_NUM_RESULTS: u64 = 10;
const SCRAPER_USER_AGENT: &str = "Mozilla/5.0";

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)\s*>")
        .expect("valid regex")
});
static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// `google_search` tool backed by SerpAPI.
///
/// The key is taken from `api_key`, else from `SERPAPI_KEY` when the tool is
/// invoked. Arguments other than `query`, `num_results` and `api_key` are
/// passed through as SerpAPI query parameters.
pub fn google_search_tool(api_key: Option<String>) -> Tool {
    Tool::new("google_search", move |args| {
        let api_key = api_key.clone();
        async move { google_search(api_key, args).await }
    })
    .describe("Search the web using Google")
    .with_parameters(json!({
        "query": {"type": "string", "description": "The search query"}
    }))
}

/// `scrape_website` tool returning `{url, content, status}`.
///
/// Without a `selector`, `content` is the page's visible text. With a CSS
/// `selector`, `content` is the list of matching elements' texts.
pub fn scrape_website_tool() -> Tool {
    Tool::new("scrape_website", |args| async move { scrape_website(args).await })
        .describe("Scrape the visible text content of a website")
        .with_parameters(json!({
            "url": {"type": "string", "description": "The URL of the website to scrape"},
            "selector": {
                "type": "string",
                "description": "Optional CSS selector; returns the text of each matching element"
            }
        }))
}

async fn google_search(api_key: Option<String>, args: Value) -> Result<Value, ToolError> {
    let api_key = serpapi_key(api_key.as_deref(), &args, |name| std::env::var(name).ok())?;
    let params = search_params(&args, &api_key)?;
    tracing::debug!(query = %params[0].1, "running web search");

    let client = http_client().map_err(|err| ToolError::Execution(err.to_string()))?;
    let response = client
        .get(SERPAPI_ENDPOINT)
        .query(&params)
        .send()
        .await
        .map_err(|err| ToolError::Execution(format!("Search failed: {err}")))?;

    let status = response.status();
    let body = response
        .json::<Value>()
        .await
        .map_err(|err| ToolError::Execution(format!("Search failed: {err}")))?;

    if !status.is_success() {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| status.to_string());
        return Err(ToolError::Execution(format!("Search failed: {message}")));
    }
    Ok(body)
}

fn serpapi_key<F>(explicit: Option<&str>, args: &Value, lookup: F) -> Result<String, ToolError>
where
    F: Fn(&str) -> Option<String>,
{
    explicit
        .map(str::to_string)
        .or_else(|| args.get("api_key").and_then(Value::as_str).map(str::to_string))
        .or_else(|| lookup(SERPAPI_KEY_ENV))
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| ToolError::Execution("SerpAPI key is required".to_string()))
}

fn search_params(args: &Value, api_key: &str) -> Result<Vec<(String, String)>, ToolError> {
    let empty = Map::new();
    let object = args.as_object().unwrap_or(&empty);

    let query = object
        .get("query")
        .and_then(Value::as_str)
        .filter(|query| !query.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: "google_search".to_string(),
            message: "'query' must be a non-empty string".to_string(),
        })?;

    let num = object
        .get("num_results")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_NUM_RESULTS);

    let mut params = vec![
        ("q".to_string(), query.to_string()),
        ("api_key".to_string(), api_key.to_string()),
        ("num".to_string(), num.to_string()),
        ("engine".to_string(), "google".to_string()),
    ];

    for (key, value) in object {
        if matches!(key.as_str(), "query" | "num_results" | "api_key") {
            continue;
        }
        let rendered = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        params.retain(|(existing, _)| existing != key);
        params.push((key.clone(), rendered));
    }
    Ok(params)
}

async fn scrape_website(args: Value) -> Result<Value, ToolError> {
    let url = args
        .get("url")
        .and_then(Value::as_str)
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: "scrape_website".to_string(),
            message: "'url' must be a non-empty string".to_string(),
        })?;
    let selector = args
        .get("selector")
        .and_then(Value::as_str)
        .filter(|selector| !selector.trim().is_empty());
    if let Some(selector) = selector {
        parse_selector(selector)?;
    }
    tracing::debug!(url, selector, "scraping website");

    let client = http_client().map_err(|err| ToolError::Execution(err.to_string()))?;
    let response = client
        .get(url)
        .header("user-agent", SCRAPER_USER_AGENT)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|err| ToolError::Execution(format!("Failed to access URL: {err}")))?;

    let status = response.status().as_u16();
    let html = response
        .text()
        .await
        .map_err(|err| ToolError::Execution(format!("Scraping failed: {err}")))?;

    let content = match selector {
        Some(selector) => json!(select_text(&html, selector)?),
        None => json!(extract_text(&html)),
    };

    Ok(json!({
        "url": url,
        "content": content,
        "status": status,
    }))
}

fn parse_selector(selector: &str) -> Result<Selector, ToolError> {
    Selector::parse(selector).map_err(|err| ToolError::InvalidArguments {
        tool: "scrape_website".to_string(),
        message: format!("invalid CSS selector '{selector}': {err}"),
    })
}

/// Collapsed text of every element matching `selector`, in document order.
fn select_text(html: &str, selector: &str) -> Result<Vec<String>, ToolError> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&selector)
        .map(|element| {
            let text = element.text().collect::<Vec<_>>().join(" ");
            WHITESPACE.replace_all(text.trim(), " ").into_owned()
        })
        .collect())
}

/// Visible text of an HTML document with whitespace collapsed.
pub fn extract_text(html: &str) -> String {
    let without_scripts = SCRIPT_OR_STYLE.replace_all(html, " ");
    let without_comments = COMMENT.replace_all(&without_scripts, " ");
    let without_tags = TAG.replace_all(&without_comments, " ");
    let decoded = decode_entities(&without_tags);
    WHITESPACE.replace_all(decoded.trim(), " ").into_owned()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
