use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failure taxonomy shared by the store, the mirror, the matcher and the HTTP layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("invalid input: {0}")]
    Validation(String),

    /// Absent, already terminal, or owned by someone else. Callers never learn which.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("store error: {0}")]
    Store(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("feed error: {0}")]
    Feed(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn store(e: impl std::fmt::Display) -> Self {
        AppError::Store(e.to_string())
    }

    pub fn cache(e: impl std::fmt::Display) -> Self {
        AppError::Cache(e.to_string())
    }

    pub fn feed(e: impl std::fmt::Display) -> Self {
        AppError::Feed(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            AppError::Store(_) | AppError::Cache(_) | AppError::Feed(_) => {
                tracing::error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
