mod anthropic;
pub mod catalog;
mod gemini;
mod ollama;
mod openai;
mod stream;

#[cfg(test)]
pub(crate) mod contract;
#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ProviderConfig;
use crate::context::{ChatContext, Message, Role};
use crate::error::{ConfigError, ProviderError};

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::{OpenAiEmbedder, OpenAiProvider};

/// The backends this crate ships adapters for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    OpenAi,
    OpenRouter,
    Anthropic,
    Gemini,
    Ollama,
}

impl BackendKind {
    pub const ALL: [BackendKind; 5] = [
        BackendKind::OpenAi,
        BackendKind::OpenRouter,
        BackendKind::Anthropic,
        BackendKind::Gemini,
        BackendKind::Ollama,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::OpenAi => "openai",
            BackendKind::OpenRouter => "openrouter",
            BackendKind::Anthropic => "anthropic",
            BackendKind::Gemini => "gemini",
            BackendKind::Ollama => "ollama",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(BackendKind::OpenAi),
            "openrouter" => Some(BackendKind::OpenRouter),
            "anthropic" => Some(BackendKind::Anthropic),
            "gemini" | "google" => Some(BackendKind::Gemini),
            "ollama" => Some(BackendKind::Ollama),
            _ => None,
        }
    }

    /// Environment variables consulted, in order, when no explicit key is given.
    pub fn credential_env_vars(self) -> &'static [&'static str] {
        match self {
            BackendKind::OpenAi => &["OPENAI_API_KEY"],
            BackendKind::OpenRouter => &["OPENROUTER_API_KEY"],
            BackendKind::Anthropic => &["ANTHROPIC_API_KEY"],
            BackendKind::Gemini => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
            BackendKind::Ollama => &[],
        }
    }

    pub fn requires_credential(self) -> bool {
        !self.credential_env_vars().is_empty()
    }
}

/// Sampling controls and output limits. `None` means "backend default".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl SamplingParams {
    /// Values set in `overrides` win; unset ones fall back to `self`.
    pub fn overlay(&self, overrides: &SamplingParams) -> SamplingParams {
        SamplingParams {
            temperature: overrides.temperature.or(self.temperature),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
            top_p: overrides.top_p.or(self.top_p),
            top_k: overrides.top_k.or(self.top_k),
            stop: if overrides.stop.is_empty() {
                self.stop.clone()
            } else {
                overrides.stop.clone()
            },
        }
    }
}

/// Per-call options for [`Provider::generate`] and [`Provider::chat`].
///
/// `extra` holds options this crate does not model. Adapters whose wire format
/// has an open-ended options object forward them; the others ignore them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerateOptions {
    pub model: Option<String>,
    pub sampling: SamplingParams,
    pub extra: Map<String, Value>,
}

impl GenerateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.sampling.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.sampling.max_tokens = Some(max_tokens);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.sampling.top_p = Some(top_p);
        self
    }

    pub fn top_k(mut self, top_k: u32) -> Self {
        self.sampling.top_k = Some(top_k);
        self
    }

    pub fn stop(mut self, stop: Vec<String>) -> Self {
        self.sampling.stop = stop;
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// A fully resolved backend request.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub sampling: SamplingParams,
    pub stream: bool,
    pub extra: Map<String, Value>,
}

/// Uniform contract over one language-model backend.
///
/// Implementations only translate a [`CompletionRequest`] into their wire
/// format in [`Provider::complete`]; prompt shaping and chat bookkeeping are
/// shared through the provided methods.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn default_model(&self) -> &str;

    fn defaults(&self) -> &SamplingParams;

    fn streaming(&self) -> bool {
        false
    }

    fn context(&self) -> &ChatContext;

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError>;

    fn build_request(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        options: &GenerateOptions,
    ) -> CompletionRequest {
        CompletionRequest {
            model: options
                .model
                .clone()
                .unwrap_or_else(|| self.default_model().to_string()),
            system,
            messages,
            sampling: self.defaults().overlay(&options.sampling),
            stream: self.streaming(),
            extra: options.extra.clone(),
        }
    }

    /// Stateless single-shot completion; the chat context is neither read nor written.
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, ProviderError> {
        let request = self.build_request(vec![Message::user(prompt)], None, options);
        self.complete(request).await
    }

    async fn generate_batch(
        &self,
        prompts: &[String],
        options: &GenerateOptions,
    ) -> Result<Vec<String>, ProviderError> {
        let mut outputs = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            outputs.push(self.generate(prompt, options).await?);
        }
        Ok(outputs)
    }

    /// One conversational turn. The user message is recorded before the
    /// backend call and the reply is recorded before returning. On a backend
    /// error the user turn stays recorded and the error is returned unchanged.
    async fn chat(&self, message: &str, options: &GenerateOptions) -> Result<String, ProviderError> {
        let context = self.context();
        context.add_message(Role::User, message);

        let request = self.build_request(context.history(), context.system_prompt(), options);
        tracing::debug!(
            provider = self.name(),
            model = %request.model,
            messages = request.messages.len(),
            "sending chat turn"
        );

        let reply = self.complete(request).await?;
        context.add_message(Role::Assistant, reply.clone());
        Ok(reply)
    }

    fn history(&self) -> Vec<Message> {
        self.context().history()
    }

    fn clear_history(&self) {
        self.context().clear_history();
    }

    fn set_system_prompt(&self, prompt: Option<String>) {
        self.context().set_system_prompt(prompt);
    }
}

/// Instantiates the adapter for `kind`, bound to `context`.
pub fn build_provider(
    kind: BackendKind,
    config: ProviderConfig,
    context: Arc<ChatContext>,
) -> Result<Arc<dyn Provider>, ConfigError> {
    let provider: Arc<dyn Provider> = match kind {
        BackendKind::OpenAi => Arc::new(OpenAiProvider::new(config)?.with_context(context)),
        BackendKind::OpenRouter => {
            Arc::new(OpenAiProvider::openrouter(config)?.with_context(context))
        }
        BackendKind::Anthropic => Arc::new(AnthropicProvider::new(config)?.with_context(context)),
        BackendKind::Gemini => Arc::new(GeminiProvider::new(config)?.with_context(context)),
        BackendKind::Ollama => Arc::new(OllamaProvider::new(config)?.with_context(context)),
    };
    Ok(provider)
}

pub(crate) fn http_client() -> Result<reqwest::Client, ConfigError> {
    let builder = reqwest::Client::builder();
    // Tests talk to a loopback fake server.
    #[cfg(test)]
    let builder = builder.no_proxy();
    builder
        .build()
        .map_err(|err| ConfigError::Invalid(format!("failed to build http client: {err}")))
}

/// Role name for wire formats that only know `system`, `user` and `assistant`.
/// Unrecognized roles are sent as user turns.
pub(crate) fn wire_role(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::Assistant => "assistant",
        Role::User | Role::Other(_) => "user",
    }
}

pub(crate) fn log_ignored_options(provider: &str, extra: &Map<String, Value>) {
    if !extra.is_empty() {
        tracing::debug!(
            provider,
            options = ?extra.keys().collect::<Vec<_>>(),
            "ignoring options the backend does not accept"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_overrides() {
        let defaults = SamplingParams {
            temperature: Some(0.5),
            max_tokens: Some(500),
            top_p: Some(0.95),
            top_k: Some(40),
            stop: vec!["END".to_string()],
        };
        let overrides = SamplingParams {
            temperature: Some(0.0),
            ..SamplingParams::default()
        };

        let merged = defaults.overlay(&overrides);
        assert_eq!(merged.temperature, Some(0.0));
        assert_eq!(merged.max_tokens, Some(500));
        assert_eq!(merged.top_k, Some(40));
        assert_eq!(merged.stop, vec!["END".to_string()]);
    }

    #[test]
    fn backend_names_round_trip() {
        for kind in BackendKind::ALL {
            assert_eq!(BackendKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(BackendKind::from_name("Google"), Some(BackendKind::Gemini));
        assert_eq!(BackendKind::from_name("mistral"), None);
        assert!(!BackendKind::Ollama.requires_credential());
    }

    #[test]
    fn options_builder_collects_extra() {
        let options = GenerateOptions::new()
            .model("m")
            .top_k(5)
            .option("seed", 7)
            .option("presence_penalty", 0.5);
        assert_eq!(options.model.as_deref(), Some("m"));
        assert_eq!(options.sampling.top_k, Some(5));
        assert_eq!(options.extra.len(), 2);
    }
}
