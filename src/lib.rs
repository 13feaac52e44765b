//! Multi-backend LLM toolkit.
//!
//! - `Provider` adapters for OpenAI, OpenRouter, Anthropic, Gemini and Ollama
//! - `Router` resolving `<backend>/<model>` identifiers
//! - `ChatContext` conversation state shared explicitly between providers
//! - `VectorStore` cosine-similarity memory (in-memory and JSON-file backed)
//! - `Agent` bounded `USE_TOOL:` orchestration loop with web tools

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod retrieval;
pub mod router;
pub mod tools;
pub mod vector;

pub use agent::{
    Agent, AgentBuilder, AgentConfig, AgentEvent, AgentRun, LoopState, StepRecord, Termination,
    ToolRequest,
};
pub use config::{BackendConfig, ProviderConfig, RouterConfig};
pub use context::{ChatContext, Message, Role};
pub use error::{
    AgentError, ConfigError, ProviderError, ResolutionError, RetrievalError, RouterError,
    ToolError, VectorStoreError,
};
pub use llm::{
    AnthropicProvider, BackendKind, GeminiProvider, GenerateOptions, OllamaProvider,
    OpenAiEmbedder, OpenAiProvider, Provider, SamplingParams, build_provider,
};
pub use retrieval::{Embedder, RetrievalChat};
pub use router::{Router, RouterBuilder};
pub use tools::Tool;
pub use vector::{InMemoryVectorStore, JsonFileVectorStore, Metadata, VectorStore};
