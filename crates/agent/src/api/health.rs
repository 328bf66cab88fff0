//! `/health`: liveness plus configuration validity.

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::server::AppState;

pub async fn get(State(state): State<Arc<AppState>>) -> Json<Value> {
    let status = state.status.load();
    let config_errors = state.config.validate();

    Json(json!({
        "status": "ok",
        "server_status": status.server_status,
        "port": status.port,
        "pid": status.server_pid,
        "server_error": status.server_error,
        "config_valid": config_errors.is_empty(),
        "config_errors": config_errors,
    }))
}
