use std::sync::Arc;

use anthropic_ai_sdk::client::AnthropicClient;
use anthropic_ai_sdk::types::message::{
    ContentBlock, CreateMessageParams, CreateMessageResponse, Message as AnthropicMessage,
    MessageClient, MessageError, RequiredMessageParams, Role as AnthropicRole,
};
use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::context::{ChatContext, Message, Role};
use crate::error::{ConfigError, ProviderError};
use crate::llm::{BackendKind, CompletionRequest, Provider, SamplingParams, log_ignored_options};

const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API adapter built on `anthropic-ai-sdk`.
///
/// Responses are always fetched whole; `top_k` and stop sequences are not
/// forwarded.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: AnthropicClient,
    config: ProviderConfig,
    context: Arc<ChatContext>,
}

impl AnthropicProvider {
    pub fn new(mut config: ProviderConfig) -> Result<Self, ConfigError> {
        config.validate(BackendKind::Anthropic)?;
        let api_key = config.require_api_key(BackendKind::Anthropic)?;
        config.sampling.max_tokens.get_or_insert(DEFAULT_MAX_TOKENS);

        let mut builder =
            AnthropicClient::builder(api_key, AnthropicClient::DEFAULT_API_VERSION.to_string());
        if let Some(url) = &config.api_base_url {
            builder = builder.with_api_base_url(url.clone());
        }

        let client = builder
            .build::<MessageError>()
            .map_err(|err| ConfigError::Invalid(format!("anthropic client: {err}")))?;

        Ok(Self {
            client,
            config,
            context: Arc::new(ChatContext::new()),
        })
    }

    /// Reads `ANTHROPIC_API_KEY` from the environment.
    pub fn from_env(model: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(ProviderConfig::new(model))
    }

    pub fn with_context(mut self, context: Arc<ChatContext>) -> Self {
        self.context = context;
        self
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        BackendKind::Anthropic.name()
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    fn defaults(&self) -> &SamplingParams {
        &self.config.sampling
    }

    fn context(&self) -> &ChatContext {
        &self.context
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        log_ignored_options(self.name(), &request.extra);
        if request.sampling.top_k.is_some() || !request.sampling.stop.is_empty() {
            tracing::debug!(
                provider = self.name(),
                "top_k and stop sequences are not forwarded to anthropic"
            );
        }

        let (history, system) = to_anthropic_messages(&request.messages, request.system.as_deref());

        let required = RequiredMessageParams {
            model: request.model.clone(),
            messages: history,
            max_tokens: request.sampling.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        };

        let mut params = CreateMessageParams::new(required).with_stream(false);

        if let Some(system_prompt) = system {
            params = params.with_system(system_prompt);
        }

        if let Some(temperature) = request.sampling.temperature {
            params = params.with_temperature(temperature);
        }

        if let Some(top_p) = request.sampling.top_p {
            params = params.with_top_p(top_p);
        }

        let response = self
            .client
            .create_message(Some(&params))
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        Ok(normalize_response(&response))
    }
}

fn to_anthropic_messages(
    messages: &[Message],
    system: Option<&str>,
) -> (Vec<AnthropicMessage>, Option<String>) {
    let mut system_lines = Vec::new();
    if let Some(system) = system.filter(|text| !text.is_empty()) {
        system_lines.push(system.to_string());
    }

    let mut anthropic_messages = Vec::new();
    for message in messages {
        match &message.role {
            Role::System => system_lines.push(message.content.clone()),
            Role::Assistant => anthropic_messages.push(AnthropicMessage::new_text(
                AnthropicRole::Assistant,
                message.content.clone(),
            )),
            Role::User | Role::Other(_) => anthropic_messages.push(AnthropicMessage::new_text(
                AnthropicRole::User,
                message.content.clone(),
            )),
        }
    }

    let system = if system_lines.is_empty() {
        None
    } else {
        Some(system_lines.join("\n\n"))
    };

    (anthropic_messages, system)
}

fn normalize_response(response: &CreateMessageResponse) -> String {
    response
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}
