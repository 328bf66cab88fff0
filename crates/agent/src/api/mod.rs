//! HTTP API handlers.

pub mod chat;
pub mod checkpoints;
pub mod dialogs;
pub mod health;
pub mod history;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::AgentError;

/// Error wrapper mapping agent errors onto HTTP statuses.
pub struct ApiError(pub AgentError);

pub type ApiResult<T> = Result<T, ApiError>;

impl<E: Into<AgentError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AgentError::DialogNotFound { .. } => StatusCode::NOT_FOUND,
            AgentError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AgentError::DialogExists { .. } => StatusCode::CONFLICT,
            AgentError::Versioning(crate::versioning::VersioningError::NotFound(_))
            | AgentError::Versioning(crate::versioning::VersioningError::InvalidCommitId(_)) => {
                StatusCode::NOT_FOUND
            }
            AgentError::Versioning(crate::versioning::VersioningError::NoApprovedCommit) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
