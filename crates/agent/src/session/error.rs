use thiserror::Error;

/// Errors from the dialog persistence layer.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("tool result not found: {0}")]
    ResultNotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("blocking task failed: {0}")]
    TaskJoin(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

impl From<rusqlite::Error> for SessionError {
    fn from(e: rusqlite::Error) -> Self {
        SessionError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Serialization(e.to_string())
    }
}
