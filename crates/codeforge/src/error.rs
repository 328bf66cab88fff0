use thiserror::Error;

/// Error types that can occur when interacting with an LLM provider.
#[derive(Debug, Error)]
pub enum LLMError {
    /// HTTP or connection failure while talking to the provider.
    #[error("network error: {0}")]
    Network(String),
    /// Authentication or authorization failure.
    #[error("auth error: {0}")]
    Auth(String),
    /// The request was rejected as invalid by the provider.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The conversation no longer fits the model's context window.
    #[error("context window exceeded: {0}")]
    ContextWindow(String),
    /// Any other provider-reported failure.
    #[error("provider error: {0}")]
    ProviderError(String),
    /// JSON (de)serialization failure on a provider payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The client does not support the requested capability.
    #[error("not implemented: {0}")]
    NotImplemented(String),
}
