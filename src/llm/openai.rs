use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ProviderConfig;
use crate::context::ChatContext;
use crate::error::{ConfigError, ProviderError};
use crate::llm::stream::{for_each_line, sse_data};
use crate::llm::{
    BackendKind, CompletionRequest, Provider, SamplingParams, http_client, wire_role,
};
use crate::retrieval::Embedder;

const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_API_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENROUTER_DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const EMPTY_USER_CONTENT_FALLBACK: &str = " ";

/// Chat-completions adapter for OpenAI and OpenAI-compatible gateways.
///
/// OpenRouter speaks the same wire format, so [`OpenAiProvider::openrouter`]
/// only swaps the base URL, credential and attribution headers.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    kind: BackendKind,
    api_key: String,
    config: ProviderConfig,
    headers: Vec<(&'static str, String)>,
    context: Arc<ChatContext>,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ConfigError> {
        Self::with_kind(BackendKind::OpenAi, config)
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(ProviderConfig::new(model))
    }

    pub fn openrouter(mut config: ProviderConfig) -> Result<Self, ConfigError> {
        config
            .sampling
            .temperature
            .get_or_insert(OPENROUTER_DEFAULT_TEMPERATURE);
        Self::with_kind(BackendKind::OpenRouter, config)
    }

    fn with_kind(kind: BackendKind, config: ProviderConfig) -> Result<Self, ConfigError> {
        config.validate(kind)?;
        let api_key = config.require_api_key(kind)?;

        Ok(Self {
            client: http_client()?,
            kind,
            api_key,
            config,
            headers: Vec::new(),
            context: Arc::new(ChatContext::new()),
        })
    }

    pub fn with_context(mut self, context: Arc<ChatContext>) -> Self {
        self.context = context;
        self
    }

    /// OpenRouter app attribution (`HTTP-Referer` and `X-Title`).
    pub fn with_attribution(mut self, referer: impl Into<String>, title: impl Into<String>) -> Self {
        self.headers.push(("HTTP-Referer", referer.into()));
        self.headers.push(("X-Title", title.into()));
        self
    }

    fn endpoint(&self) -> String {
        let default = match self.kind {
            BackendKind::OpenRouter => OPENROUTER_API_BASE_URL,
            _ => OPENAI_API_BASE_URL,
        };
        let base = self
            .config
            .api_base_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/');
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    fn defaults(&self) -> &SamplingParams {
        &self.config.sampling
    }

    fn streaming(&self) -> bool {
        self.config.stream
    }

    fn context(&self) -> &ChatContext {
        &self.context
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let payload = build_request(&request, self.kind);

        let mut builder = self
            .client
            .post(self.endpoint())
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json");
        for (name, value) in &self.headers {
            builder = builder.header(*name, value);
        }

        let response = builder
            .json(&payload)
            .send()
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Request(
                extract_api_error(self.name(), response).await,
            ));
        }

        if request.stream {
            let mut text = String::new();
            let mut done = false;
            for_each_line(response, |line| {
                if !done {
                    done = apply_stream_line(line, &mut text)?;
                }
                Ok(())
            })
            .await?;
            return Ok(text);
        }

        let payload = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|err| ProviderError::Response(err.to_string()))?;

        normalize_response(self.name(), payload)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<AssistantMessage>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<Value>,
}

fn build_request(request: &CompletionRequest, kind: BackendKind) -> Value {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = request.system.as_ref().filter(|text| !text.is_empty()) {
        messages.push(WireMessage {
            role: "system".to_string(),
            content: system.clone(),
        });
    }
    messages.extend(request.messages.iter().map(|message| WireMessage {
        role: wire_role(&message.role).to_string(),
        content: message.content.clone(),
    }));
    if messages.is_empty() {
        messages.push(WireMessage {
            role: "user".to_string(),
            content: EMPTY_USER_CONTENT_FALLBACK.to_string(),
        });
    }

    // Plain OpenAI rejects top_k; OpenRouter forwards it to the routed model.
    let top_k = match kind {
        BackendKind::OpenRouter => request.sampling.top_k,
        _ => None,
    };

    let body = ChatCompletionRequest {
        model: request.model.clone(),
        messages,
        temperature: request.sampling.temperature,
        top_p: request.sampling.top_p,
        top_k,
        max_tokens: request.sampling.max_tokens,
        stop: request.sampling.stop.clone(),
        stream: request.stream,
    };

    let mut value = serde_json::to_value(body).unwrap_or_else(|_| Value::Object(Default::default()));
    if let Value::Object(map) = &mut value {
        for (key, extra) in &request.extra {
            map.entry(key.clone()).or_insert_with(|| extra.clone());
        }
    }
    value
}

fn normalize_response(
    provider: &str,
    response: ChatCompletionResponse,
) -> Result<String, ProviderError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Response(format!("{provider} response missing choices")))?;

    let message = choice.message.ok_or_else(|| {
        ProviderError::Response(format!("{provider} response missing choice message"))
    })?;

    Ok(message.content.unwrap_or_default())
}

/// Appends one SSE line's delta to `text`. Returns `true` on the `[DONE]` sentinel.
fn apply_stream_line(line: &str, text: &mut String) -> Result<bool, ProviderError> {
    let Some(data) = sse_data(line) else {
        return Ok(false);
    };
    if data == "[DONE]" {
        return Ok(true);
    }

    let chunk = serde_json::from_str::<StreamChunk>(data)
        .map_err(|err| ProviderError::Response(format!("invalid stream chunk: {err}")))?;
    for choice in chunk.choices {
        if let Some(content) = choice.delta.and_then(|delta| delta.content) {
            text.push_str(&content);
        }
    }
    Ok(false)
}

async fn extract_api_error(provider: &str, response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if let Ok(parsed) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let code = parsed
            .error
            .code
            .map(|value| match value {
                Value::String(value) => value,
                other => other.to_string(),
            })
            .unwrap_or_else(|| status.as_u16().to_string());
        let error_type = parsed
            .error
            .type_
            .unwrap_or_else(|| status.to_string().to_uppercase());
        let message = parsed
            .error
            .message
            .unwrap_or_else(|| format!("unknown {provider} api error"));

        return format!("{provider} api error {code} {error_type}: {message}");
    }

    if body.is_empty() {
        format!("{provider} api request failed ({status})")
    } else {
        format!("{provider} api request failed ({status}): {body}")
    }
}

/// `/embeddings` client used by retrieval-augmented chat.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    model: String,
    api_base_url: Option<String>,
}

impl OpenAiEmbedder {
    pub fn new(api_key: Option<String>, model: Option<String>) -> Result<Self, ConfigError> {
        let api_key = crate::config::resolve_credential(
            api_key.as_deref(),
            BackendKind::OpenAi,
            |name| std::env::var(name).ok(),
        )?;

        Ok(Self {
            client: http_client()?,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            api_base_url: None,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    fn endpoint(&self) -> String {
        let base = self
            .api_base_url
            .as_deref()
            .unwrap_or(OPENAI_API_BASE_URL)
            .trim_end_matches('/');
        format!("{base}/embeddings")
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

fn first_embedding(response: EmbeddingResponse) -> Result<Vec<f32>, ProviderError> {
    response
        .data
        .into_iter()
        .next()
        .map(|data| data.embedding)
        .ok_or_else(|| ProviderError::Response("embedding response missing data".to_string()))
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Request(
                extract_api_error("openai", response).await,
            ));
        }

        let payload = response
            .json::<EmbeddingResponse>()
            .await
            .map_err(|err| ProviderError::Response(err.to_string()))?;
        first_embedding(payload)
    }
}
