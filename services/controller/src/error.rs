use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use medilearn_core::federated_learning::{ConfigError, ControllerError};
use medilearn_core::StoreError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Error surface of the HTTP API. Every variant renders as `{"error": <kind>, "message": <text>}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self { ApiError::Controller(e.into()) }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Controller(ControllerError::AlreadyRunning { .. }) => (StatusCode::CONFLICT, "already_running"),
            ApiError::Controller(ControllerError::Busy { .. }) => (StatusCode::CONFLICT, "busy"),
            ApiError::Controller(ControllerError::Config(_)) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_config"),
            ApiError::Controller(ControllerError::Store(_)) | ApiError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            error!(error = %self, kind, "request_failed");
        }
        (status, Json(json!({"error": kind, "message": self.to_string()}))).into_response()
    }
}
