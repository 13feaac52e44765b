//! Tagged parser for the plain-text tool-call protocol:
//!
//! ```text
//! I'll search first.
//! USE_TOOL: google_search
//! PARAMETERS: {"query": "rust async runtimes"}
//! ```
//!
//! Parameters are decoded as a single JSON object; model output is never
//! evaluated.

use serde_json::{Map, Value};

pub const TOOL_MARKER: &str = "USE_TOOL:";
pub const PARAMETERS_MARKER: &str = "PARAMETERS:";

#[derive(Clone, Debug, PartialEq)]
pub enum ParsedOutput {
    /// No tool marker; the whole text is the answer.
    Answer,
    ToolRequest {
        name: String,
        arguments: Value,
    },
    /// A marker was present but the request could not be decoded.
    Malformed {
        name: Option<String>,
        reason: String,
    },
}

pub fn parse_model_output(text: &str) -> ParsedOutput {
    let Some(marker) = text.find(TOOL_MARKER) else {
        return ParsedOutput::Answer;
    };
    let request = &text[marker + TOOL_MARKER.len()..];

    let (name_segment, parameters) = match request.find(PARAMETERS_MARKER) {
        Some(pos) => (
            &request[..pos],
            Some(&request[pos + PARAMETERS_MARKER.len()..]),
        ),
        None => (request, None),
    };

    let name = name_segment
        .split_whitespace()
        .next()
        .map(|token| token.trim_matches(|c| matches!(c, '`' | '"' | '\'' | '*')))
        .filter(|token| !token.is_empty());
    let Some(name) = name else {
        return ParsedOutput::Malformed {
            name: None,
            reason: "tool name is missing after USE_TOOL:".to_string(),
        };
    };

    match parameters.map(parse_parameters).unwrap_or(Ok(Value::Object(Map::new()))) {
        Ok(arguments) => ParsedOutput::ToolRequest {
            name: name.to_string(),
            arguments,
        },
        Err(reason) => ParsedOutput::Malformed {
            name: Some(name.to_string()),
            reason,
        },
    }
}

/// Decodes the first JSON value after the marker, optionally inside a code
/// fence. Anything after that value is ignored.
fn parse_parameters(segment: &str) -> Result<Value, String> {
    let mut body = segment.trim_start();
    if let Some(fenced) = body.strip_prefix("```") {
        body = fenced
            .split_once('\n')
            .map(|(_, rest)| rest)
            .unwrap_or("")
            .trim_start();
    }

    if body.is_empty() || body.starts_with("```") {
        return Ok(Value::Object(Map::new()));
    }

    let mut values = serde_json::Deserializer::from_str(body).into_iter::<Value>();
    match values.next() {
        Some(Ok(Value::Object(map))) => Ok(Value::Object(map)),
        Some(Ok(other)) => Err(format!(
            "PARAMETERS must be a JSON object, got {}",
            json_kind(&other)
        )),
        Some(Err(err)) => Err(format!("PARAMETERS is not valid JSON: {err}")),
        None => Ok(Value::Object(Map::new())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
