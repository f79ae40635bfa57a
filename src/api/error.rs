use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::search::models::ValidationError;
use crate::warehouse::WarehouseError;

/// Failures surfaced by the HTTP API
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server is missing something it needs; message is fixed
    #[error("{0}")]
    Configuration(&'static str),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Incorrect password")]
    Unauthorized,

    /// Carries the warehouse's own error text
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Configuration(_) | ApiError::Warehouse(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = match &self {
            ApiError::Validation(e) => json!({ "detail": self.to_string(), "field": e.field }),
            _ => json!({ "detail": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
