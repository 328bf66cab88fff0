//! Dialog CRUD and current-dialog selection.

use axum::Json;
use axum::extract::{Path, Query, State};
use log::warn;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::server::AppState;

use super::{ApiError, ApiResult};

pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let index = state.project.load_dialogs_index().map_err(ApiError)?;
    Ok(Json(json!({
        "current_dialog_id": index.current_dialog_id,
        "dialogs": index.dialogs,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_set_current")]
    pub set_current: bool,
}

fn default_set_current() -> bool {
    true
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRequest>,
) -> ApiResult<Json<Value>> {
    let meta = state
        .project
        .create_dialog(request.title, request.set_current)
        .map_err(ApiError)?;

    // Anchor the dialog with an initial checkpoint so the very first restore
    // target always exists. Failure degrades, never blocks creation.
    match state.service.versioning_for(&meta.id).await {
        Ok(versioning) => match versioning.create_checkpoint("Initial checkpoint").await {
            Ok(commit_id) => {
                let _ = state.project.update_dialog(&meta.id, |m| {
                    m.initial_checkpoint = Some(commit_id);
                });
            }
            Err(e) => warn!("initial checkpoint failed for {}: {}", meta.id, e),
        },
        Err(e) => warn!("versioning unavailable for {}: {}", meta.id, e),
    }

    Ok(Json(json!({ "id": meta.id })))
}

pub async fn current(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let index = state.project.load_dialogs_index().map_err(ApiError)?;
    let meta = index
        .current_dialog_id
        .as_ref()
        .and_then(|id| index.dialogs.iter().find(|d| &d.id == id).cloned());
    Ok(Json(json!({
        "id": index.current_dialog_id,
        "meta": meta,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SetCurrentQuery {
    pub id: String,
}

pub async fn set_current(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SetCurrentQuery>,
) -> ApiResult<Json<Value>> {
    state.project.set_current_dialog(&query.id).map_err(ApiError)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(dialog_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let meta = state.project.get_dialog(&dialog_id).map_err(ApiError)?;
    Ok(Json(serde_json::to_value(meta).map_err(ApiError::from)?))
}

#[derive(Debug, Deserialize)]
pub struct PatchRequest {
    #[serde(default)]
    pub title: Option<String>,
}

pub async fn patch(
    State(state): State<Arc<AppState>>,
    Path(dialog_id): Path<String>,
    Json(request): Json<PatchRequest>,
) -> ApiResult<Json<Value>> {
    state
        .project
        .update_dialog(&dialog_id, |meta| {
            if let Some(title) = request.title {
                meta.title = Some(title);
            }
        })
        .map_err(ApiError)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(dialog_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.service.forget_dialog(&dialog_id).await;
    state.project.delete_dialog(&dialog_id).map_err(ApiError)?;
    Ok(Json(json!({ "ok": true })))
}
