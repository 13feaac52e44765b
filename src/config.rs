//! Provider and router configuration.
//!
//! Router configuration is a JSON object keyed by backend name:
//!
//! ```json
//! {
//!   "openai": { "api_key": "sk-...", "models": ["gpt-4o-mini", "gpt-4o"] },
//!   "gemini": { "models": ["gemini-2.0-flash"], "temperature": 0.2 },
//!   "ollama": { "models": ["llama3.2"], "stream": true }
//! }
//! ```
//!
//! `credential` is accepted as an alias of `api_key`. When neither is given the
//! backend's environment variables are consulted at construction time.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::llm::{BackendKind, SamplingParams};

/// Construction parameters shared by every provider adapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderConfig {
    /// Explicit credential. Falls back to the backend's environment variables.
    pub api_key: Option<String>,
    /// Model used when a call does not name one.
    pub model: String,
    /// Base URL override for proxies or compatible endpoints.
    pub api_base_url: Option<String>,
    /// Default sampling and length limits; per-call options override them.
    pub sampling: SamplingParams,
    /// Consume the backend's streaming endpoint and concatenate the deltas.
    pub stream: bool,
}

impl ProviderConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
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

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Resolves the credential from the explicit key or the process environment.
    pub fn require_api_key(&self, kind: BackendKind) -> Result<String, ConfigError> {
        resolve_credential(self.api_key.as_deref(), kind, |name| std::env::var(name).ok())
    }

    pub(crate) fn validate(&self, kind: BackendKind) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{} provider requires a model",
                kind.name()
            )));
        }
        Ok(())
    }
}

/// Picks the explicit credential, else the first set environment variable.
pub fn resolve_credential<F>(
    explicit: Option<&str>,
    kind: BackendKind,
    lookup: F,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = explicit.map(str::trim).filter(|key| !key.is_empty()) {
        return Ok(key.to_string());
    }

    for &name in kind.credential_env_vars() {
        if let Some(value) = lookup(name).filter(|value| !value.trim().is_empty()) {
            return Ok(value);
        }
    }

    Err(ConfigError::MissingCredential {
        backend: kind.name().to_string(),
        env_var: kind
            .credential_env_vars()
            .first()
            .copied()
            .unwrap_or("<none>"),
    })
}

/// One backend entry of a [`RouterConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default, alias = "credential", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Permitted models. The first one is the provider's default.
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    #[serde(flatten)]
    pub sampling: SamplingParams,
    #[serde(default)]
    pub stream: bool,
}

impl BackendConfig {
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            models: models.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub(crate) fn provider_config(&self, backend: &str) -> Result<ProviderConfig, ConfigError> {
        let Some(model) = self.models.first() else {
            return Err(ConfigError::Invalid(format!(
                "backend '{backend}' lists no models"
            )));
        };

        Ok(ProviderConfig {
            api_key: self.api_key.clone(),
            model: model.clone(),
            api_base_url: self.api_base_url.clone(),
            sampling: self.sampling.clone(),
            stream: self.stream,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouterConfig {
    pub backends: BTreeMap<String, BackendConfig>,
}

impl RouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, name: impl Into<String>, config: BackendConfig) -> Self {
        self.backends.insert(name.into(), config);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::debug!(config_path = %path.display(), "loading router configuration");
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}
