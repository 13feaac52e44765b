use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::context::{ChatContext, Role};
use crate::error::{ConfigError, ProviderError};
use crate::llm::stream::{for_each_line, sse_data};
use crate::llm::{
    BackendKind, CompletionRequest, Provider, SamplingParams, http_client, log_ignored_options,
};

const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 500;
const DEFAULT_TEMPERATURE: f32 = 0.5;
const DEFAULT_TOP_P: f32 = 0.95;
const DEFAULT_TOP_K: u32 = 40;

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    config: ProviderConfig,
    context: Arc<ChatContext>,
}

impl GeminiProvider {
    /// Unset sampling fields fall back to 500 output tokens, temperature 0.5,
    /// top-p 0.95 and top-k 40.
    pub fn new(mut config: ProviderConfig) -> Result<Self, ConfigError> {
        config.validate(BackendKind::Gemini)?;
        let api_key = config.require_api_key(BackendKind::Gemini)?;

        let sampling = &mut config.sampling;
        sampling.max_tokens.get_or_insert(DEFAULT_MAX_OUTPUT_TOKENS);
        sampling.temperature.get_or_insert(DEFAULT_TEMPERATURE);
        sampling.top_p.get_or_insert(DEFAULT_TOP_P);
        sampling.top_k.get_or_insert(DEFAULT_TOP_K);

        Ok(Self {
            client: http_client()?,
            api_key,
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

    fn endpoint(&self, model: &str, stream: bool) -> String {
        let base = self
            .config
            .api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/');
        if stream {
            format!("{base}/models/{model}:streamGenerateContent?alt=sse")
        } else {
            format!("{base}/models/{model}:generateContent")
        }
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        BackendKind::Gemini.name()
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
        log_ignored_options(self.name(), &request.extra);
        let payload = build_request(&request);

        let response = self
            .client
            .post(self.endpoint(&request.model, request.stream))
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Request(extract_api_error(response).await));
        }

        if request.stream {
            let mut text = String::new();
            for_each_line(response, |line| {
                let Some(data) = sse_data(line) else {
                    return Ok(());
                };
                let chunk = serde_json::from_str::<GenerateContentResponse>(data)
                    .map_err(|err| ProviderError::Response(format!("invalid stream chunk: {err}")))?;
                text.push_str(&candidate_text(chunk));
                Ok(())
            })
            .await?;
            return Ok(text);
        }

        let payload = response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|err| ProviderError::Response(err.to_string()))?;

        normalize_response(payload)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
}

impl GeminiPart {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            thought: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorEnvelope {
    error: GeminiApiError,
}

#[derive(Debug, Deserialize)]
struct GeminiApiError {
    code: Option<u16>,
    status: Option<String>,
    message: Option<String>,
}

fn build_request(request: &CompletionRequest) -> GenerateContentRequest {
    let mut system_lines = Vec::new();
    if let Some(system) = request.system.as_ref().filter(|text| !text.is_empty()) {
        system_lines.push(system.clone());
    }

    let mut contents = Vec::new();
    for message in &request.messages {
        if message.content.is_empty() {
            continue;
        }
        let role = match &message.role {
            Role::System => {
                system_lines.push(message.content.clone());
                continue;
            }
            Role::Assistant => "model",
            Role::User | Role::Other(_) => "user",
        };
        contents.push(GeminiContent {
            role: role.to_string(),
            parts: vec![GeminiPart::text(message.content.clone())],
        });
    }

    let system_instruction = (!system_lines.is_empty()).then(|| GeminiSystemInstruction {
        parts: vec![GeminiPart::text(system_lines.join("\n\n"))],
    });

    let sampling = &request.sampling;
    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: GenerationConfig {
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            top_k: sampling.top_k,
            max_output_tokens: sampling.max_tokens,
            stop_sequences: sampling.stop.clone(),
        },
    }
}

fn candidate_text(response: GenerateContentResponse) -> String {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter(|part| !part.thought.unwrap_or(false))
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn normalize_response(response: GenerateContentResponse) -> Result<String, ProviderError> {
    if response.candidates.is_empty() {
        return Err(ProviderError::Response(
            "gemini response missing candidates".to_string(),
        ));
    }
    Ok(candidate_text(response))
}

async fn extract_api_error(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if let Ok(parsed) = serde_json::from_str::<GeminiErrorEnvelope>(&body) {
        let code = parsed.error.code.unwrap_or(status.as_u16());
        let status_name = parsed
            .error
            .status
            .unwrap_or_else(|| status.to_string().to_uppercase());
        let message = parsed
            .error
            .message
            .unwrap_or_else(|| "unknown gemini api error".to_string());
        return format!("gemini api error {code} {status_name}: {message}");
    }

    if body.is_empty() {
        format!("gemini api request failed ({status})")
    } else {
        format!("gemini api request failed ({status}): {body}")
    }
}
