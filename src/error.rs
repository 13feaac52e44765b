use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credential for {backend}: pass an api key or set {env_var}")]
    MissingCredential {
        backend: String,
        env_var: &'static str,
    },
    #[error("unsupported backend in configuration: {0}")]
    UnsupportedBackend(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("model identifier '{0}' must have the form <backend>/<model>")]
    MalformedIdentifier(String),
    #[error("backend '{0}' is not configured")]
    UnknownBackend(String),
    #[error("model '{model}' is not available for backend '{backend}'")]
    UnknownModel { backend: String, model: String },
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider response invalid: {0}")]
    Response(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    NotFound(String),
    #[error("malformed tool call: {0}")]
    MalformedCall(String),
    #[error("invalid tool arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("tool execution failed: {0}")]
    Execution(String),
}

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("got {embeddings} embeddings but {metadatas} metadata entries")]
    DimensionMismatch { embeddings: usize, metadatas: usize },
    #[error("vector has dimension {actual}, store expects {expected}")]
    InconsistentDimension { expected: usize, actual: usize },
    #[error("vector component {index} is not a finite number")]
    NonFiniteComponent { index: usize },
    #[error("vector store io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("vector store file is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] VectorStoreError),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("agent configuration error: {0}")]
    Config(String),
}
