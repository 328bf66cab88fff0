//! `/api/dialogs/{id}/history`: paginated event reconstruction.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::history;
use crate::server::AppState;

use super::{ApiError, ApiResult};

const DEFAULT_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub before: Option<usize>,
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(dialog_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Value>> {
    let journal = state.service.journal_for(&dialog_id).await.map_err(ApiError)?;
    let page = history::get_history(
        &journal,
        &dialog_id,
        query.limit.unwrap_or(DEFAULT_LIMIT),
        query.before,
    )
    .await
    .map_err(ApiError)?;

    Ok(Json(json!({
        "dialog_id": dialog_id,
        "events": page.events,
        "total_events": page.total_events,
        "has_more": page.has_more,
        "first_idx": page.first_idx,
        "last_idx": page.last_idx,
    })))
}
