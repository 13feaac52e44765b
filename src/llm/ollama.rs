use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ProviderConfig;
use crate::context::ChatContext;
use crate::error::{ConfigError, ProviderError};
use crate::llm::stream::for_each_line;
use crate::llm::{
    BackendKind, CompletionRequest, Provider, SamplingParams, http_client, wire_role,
};

const DEFAULT_API_BASE_URL: &str = "http://localhost:11434";

/// Local Ollama server adapter (`/api/chat`). No credential is required.
///
/// The base URL comes from the config, then `OLLAMA_HOST`, then
/// `http://localhost:11434`.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    config: ProviderConfig,
    context: Arc<ChatContext>,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ConfigError> {
        config.validate(BackendKind::Ollama)?;

        let base_url = config
            .api_base_url
            .clone()
            .or_else(|| std::env::var("OLLAMA_HOST").ok())
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        Ok(Self {
            client: http_client()?,
            base_url,
            config,
            context: Arc::new(ChatContext::new()),
        })
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(ProviderConfig::new(model))
    }

    pub fn with_context(mut self, context: Arc<ChatContext>) -> Self {
        self.context = context;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        BackendKind::Ollama.name()
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
        let payload = build_request(&request);

        let response = self
            .client
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                ProviderError::Request(format!(
                    "ollama request to {} failed: {err}",
                    self.base_url
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OllamaError>(&body)
                .map(|parsed| parsed.error)
                .unwrap_or(body);
            return Err(ProviderError::Request(format!(
                "ollama api request failed ({status}): {message}"
            )));
        }

        if request.stream {
            let mut text = String::new();
            for_each_line(response, |line| {
                let chunk = serde_json::from_str::<ChatResponse>(line)
                    .map_err(|err| ProviderError::Response(format!("invalid stream chunk: {err}")))?;
                text.push_str(&chunk.content()?);
                Ok(())
            })
            .await?;
            return Ok(text);
        }

        let payload = response
            .json::<ChatResponse>()
            .await
            .map_err(|err| ProviderError::Response(err.to_string()))?;
        payload.content()
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Map::is_empty")]
    options: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<OllamaMessage>,
    #[serde(default)]
    error: Option<String>,
}

impl ChatResponse {
    fn content(self) -> Result<String, ProviderError> {
        if let Some(error) = self.error {
            return Err(ProviderError::Response(format!("ollama error: {error}")));
        }
        Ok(self.message.map(|message| message.content).unwrap_or_default())
    }
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

fn build_request(request: &CompletionRequest) -> ChatRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = request.system.as_ref().filter(|text| !text.is_empty()) {
        messages.push(OllamaMessage {
            role: "system".to_string(),
            content: system.clone(),
        });
    }
    messages.extend(request.messages.iter().map(|message| OllamaMessage {
        role: wire_role(&message.role).to_string(),
        content: message.content.clone(),
    }));

    let sampling = &request.sampling;
    let mut options = Map::new();
    if let Some(temperature) = sampling.temperature {
        options.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = sampling.top_p {
        options.insert("top_p".to_string(), Value::from(top_p));
    }
    if let Some(top_k) = sampling.top_k {
        options.insert("top_k".to_string(), Value::from(top_k));
    }
    if let Some(max_tokens) = sampling.max_tokens {
        options.insert("num_predict".to_string(), Value::from(max_tokens));
    }
    if !sampling.stop.is_empty() {
        options.insert("stop".to_string(), Value::from(sampling.stop.clone()));
    }
    for (key, value) in &request.extra {
        options.entry(key.clone()).or_insert_with(|| value.clone());
    }

    ChatRequest {
        model: request.model.clone(),
        messages,
        stream: request.stream,
        options,
    }
}
