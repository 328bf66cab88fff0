//! Checkpoint, approve/reset and session-status endpoints.

use axum::Json;
use axum::extract::{Path, State};
use log::info;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::server::AppState;

use super::{ApiError, ApiResult};

pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(dialog_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let versioning = state.service.versioning_for(&dialog_id).await.map_err(ApiError)?;
    let checkpoints = versioning.list_checkpoints().await.map_err(ApiError::from)?;

    let initial_checkpoint = state
        .project
        .get_dialog(&dialog_id)
        .ok()
        .and_then(|meta| meta.initial_checkpoint);

    Ok(Json(json!({
        "dialog_id": dialog_id,
        "checkpoints": checkpoints,
        "initial_checkpoint": initial_checkpoint,
    })))
}

#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    pub checkpoint_id: String,
}

pub async fn restore(
    State(state): State<Arc<AppState>>,
    Path(dialog_id): Path<String>,
    Json(request): Json<RestoreRequest>,
) -> ApiResult<Json<Value>> {
    let versioning = state.service.versioning_for(&dialog_id).await.map_err(ApiError)?;
    let outcome = versioning
        .restore_checkpoint(&request.checkpoint_id)
        .await
        .map_err(ApiError::from)?;
    info!(
        "dialog {}: restored {} path(s) to {}",
        dialog_id,
        outcome.restored_paths.len(),
        request.checkpoint_id
    );

    // Restored files changed on disk behind the retrieval index's back.
    let rag = state.rag.clone();
    let restored = outcome.restored_paths.clone();
    state
        .tasks
        .spawn("reindex-restored-files", async move {
            for path in restored {
                if let Err(e) = rag.reindex(&path).await {
                    log::warn!("post-restore reindex of {} failed: {}", path, e);
                }
            }
        })
        .await;

    Ok(Json(json!({
        "restored_to": request.checkpoint_id,
        "new_checkpoint": outcome.new_checkpoint,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub message: Option<String>,
}

pub async fn approve(
    State(state): State<Arc<AppState>>,
    Path(dialog_id): Path<String>,
    Json(request): Json<ApproveRequest>,
) -> ApiResult<Json<Value>> {
    let versioning = state.service.versioning_for(&dialog_id).await.map_err(ApiError)?;
    let outcome = versioning
        .approve_all(request.message.as_deref())
        .await
        .map_err(ApiError::from)?;

    let new_session = outcome.new_session.clone();
    let _ = state.project.update_dialog(&dialog_id, |meta| {
        meta.last_approved_at = Some(OffsetDateTime::now_utc().unix_timestamp());
        meta.active_session = Some(new_session);
    });

    Ok(Json(serde_json::to_value(outcome).map_err(ApiError::from)?))
}

pub async fn reset(
    State(state): State<Arc<AppState>>,
    Path(dialog_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let versioning = state.service.versioning_for(&dialog_id).await.map_err(ApiError)?;
    let outcome = versioning.reset_to_approved().await.map_err(ApiError::from)?;

    // Materialize the approved tree on disk.
    versioning
        .restore_checkpoint(&outcome.reset_to)
        .await
        .map_err(ApiError::from)?;

    let new_session = outcome.new_session.clone();
    let _ = state.project.update_dialog(&dialog_id, |meta| {
        meta.active_session = Some(new_session);
    });

    Ok(Json(serde_json::to_value(outcome).map_err(ApiError::from)?))
}

pub async fn session_status(
    State(state): State<Arc<AppState>>,
    Path(dialog_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let journal = state.service.journal_for(&dialog_id).await.map_err(ApiError)?;
    let versioning = state.service.versioning_for(&dialog_id).await.map_err(ApiError)?;

    let has_unapproved = versioning.has_unapproved().await.map_err(ApiError::from)?;
    let changed_files = if has_unapproved {
        versioning
            .session_changed_files(true)
            .await
            .map_err(ApiError::from)?
    } else {
        Vec::new()
    };
    let active = journal.active_session(&dialog_id).await.map_err(ApiError::from)?;
    let last_approved_at = state
        .project
        .get_dialog(&dialog_id)
        .ok()
        .and_then(|meta| meta.last_approved_at);

    let (active_session, session_ref) = if has_unapproved {
        match active {
            Some(session) => (Some(session.name), Some(session.ref_name)),
            None => (None, None),
        }
    } else {
        (None, None)
    };

    Ok(Json(json!({
        "active_session": active_session,
        "session_ref": session_ref,
        "has_unapproved": has_unapproved,
        "last_approved_at": last_approved_at,
        "changed_files": changed_files,
    })))
}
