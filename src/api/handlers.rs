use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::ApiError;
use crate::search::models::{SearchPayload, ValidationError};
use crate::search::Archive;

/// Shared, read-only state of the API
pub struct AppState {
    /// `None` when no warehouse client could be configured
    pub archive: Option<Archive>,
    pub dataset: Option<String>,
    pub table: Option<String>,
    pub app_password: Option<String>,
}

/// Request body for the password check
#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub password: String,
}

/// Exact, case-sensitive match against the configured password
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AuthRequest>,
) -> Result<Json<Value>, ApiError> {
    match &state.app_password {
        Some(password) if *password == request.password => {
            Ok(Json(json!({ "authenticated": true })))
        }
        Some(_) => Err(ApiError::Unauthorized),
        None => {
            warn!("Rejecting login: no APP_PASSWORD configured");
            Err(ApiError::Unauthorized)
        }
    }
}

/// List distinct annotation categories; never fails
pub async fn list_categories(State(state): State<Arc<AppState>>) -> Json<Value> {
    let categories = match &state.archive {
        Some(archive) => archive.categories().await,
        None => Vec::new(),
    };

    Json(json!({ "categories": categories }))
}

/// Echo the dataset and table being searched
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "dataset": state.dataset,
        "table": state.table,
    }))
}

/// Search the archive
pub async fn search_emails(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SearchPayload>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let archive = state
        .archive
        .as_ref()
        .ok_or(ApiError::Configuration("Warehouse client not initialized"))?;

    let Json(payload) = payload.map_err(|rejection| ValidationError {
        field: "body",
        message: rejection.body_text(),
    })?;
    let request = payload.validate()?;
    debug!(
        "Search request: query={:?} scope={} limit={} show_summaries={}",
        request.query,
        request.scope.as_str(),
        request.limit,
        request.show_summaries
    );

    let results = archive.search(&request).await?;
    Ok(Json(json!({ "results": results })))
}
