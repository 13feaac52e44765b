//! Static catalog of well-known public models.
//!
//! The catalog does not consult any configuration: a listed model may be
//! missing from a given router, and a router may serve models not listed here.
//! Use [`crate::Router::configured_models`] for what a router can actually
//! reach.

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub supports_chat: bool,
    pub supports_completion: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModelCatalog {
    pub provider: &'static str,
    pub description: &'static str,
    pub models: Vec<ModelInfo>,
}

impl ModelCatalog {
    pub fn get(&self, id: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|model| model.id == id)
    }
}

const KNOWN_MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "openai/gpt-3.5-turbo",
        max_tokens: Some(4096),
        supports_chat: true,
        supports_completion: true,
    },
    ModelInfo {
        id: "openai/gpt-4",
        max_tokens: Some(8192),
        supports_chat: true,
        supports_completion: true,
    },
    ModelInfo {
        id: "anthropic/claude-2",
        max_tokens: Some(100_000),
        supports_chat: true,
        supports_completion: true,
    },
    // Listed without published limits.
    ModelInfo {
        id: "anthropic/claude-instant-1",
        max_tokens: None,
        supports_chat: true,
        supports_completion: true,
    },
    ModelInfo {
        id: "google/gemini-pro",
        max_tokens: Some(32_768),
        supports_chat: true,
        supports_completion: true,
    },
];

pub fn list_models() -> Vec<&'static str> {
    KNOWN_MODELS.iter().map(|model| model.id).collect()
}

pub fn model_info() -> ModelCatalog {
    ModelCatalog {
        provider: "ModelRouter",
        description: "Custom model router for multiple AI providers",
        models: KNOWN_MODELS.to_vec(),
    }
}
