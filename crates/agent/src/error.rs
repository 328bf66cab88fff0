//! Structured error type for the agent crate.
//!
//! Every variant carries typed context; the HTTP layer maps variants onto
//! status codes in one place instead of scattering raw string errors.

use thiserror::Error;

/// Top-level error for agent operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AgentError {
    // --- Dialog lifecycle ---
    #[error("dialog not found: {dialog_id}")]
    DialogNotFound { dialog_id: String },

    #[error("dialog already exists: {dialog_id}")]
    DialogExists { dialog_id: String },

    // --- Storage ---
    #[error(transparent)]
    Session(#[from] crate::session::SessionError),

    #[error(transparent)]
    Versioning(#[from] crate::versioning::VersioningError),

    // --- LLM boundary ---
    #[error(transparent)]
    Llm(#[from] codeforge::LLMError),

    // --- Serialization ---
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Filesystem / state directory ---
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // --- Generic internal ---
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AgentError {
    fn from(e: anyhow::Error) -> Self {
        AgentError::Internal(e.to_string())
    }
}

/// Convenience alias used across the crate.
pub type AgentResult<T> = Result<T, AgentError>;
