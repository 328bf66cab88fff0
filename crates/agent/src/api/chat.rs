//! `/api/chat`: streaming and non-streaming chat turns.

use axum::Json;
use axum::extract::State;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use crate::chat::sse::{SSE_HEADERS, guarded_stream};
use crate::error::AgentError;
use crate::server::AppState;

use super::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<IncomingMessage>,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub dialog_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Response> {
    let query = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .ok_or_else(|| {
            ApiError(AgentError::InvalidRequest(
                "request carries no user message".to_string(),
            ))
        })?;

    let dialog_id = match request.dialog_id {
        Some(id) => id,
        None => state
            .project
            .current_dialog_id()
            .map_err(ApiError)?
            .ok_or_else(|| {
                ApiError(AgentError::InvalidRequest(
                    "no dialog_id given and no current dialog selected".to_string(),
                ))
            })?,
    };

    if request.stream {
        let rx = state
            .service
            .stream_chat(query, request.context, dialog_id);
        let sse = Sse::new(guarded_stream(rx)).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        );
        return Ok((SSE_HEADERS, sse).into_response());
    }

    let summary = state
        .service
        .chat(query, request.context, dialog_id)
        .await
        .map_err(ApiError)?;
    Ok(Json(json!({
        "content": summary.content,
        "done": true,
        "metadata": {
            "checkpoint": summary.checkpoint,
            "session": summary.session,
        }
    }))
    .into_response())
}
