use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::clients::DownstreamError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    StateConflict(String),

    #[error(transparent)]
    Downstream(#[from] DownstreamError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::StateConflict(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Downstream(err) if err.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            AppError::Downstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::StateConflict(msg)
            | AppError::Storage(msg)
            | AppError::Internal(msg) => msg.clone(),
            AppError::Downstream(err) => err.to_string(),
        };

        let body = Json(json!({
            "error": message
        }));

        (self.status_code(), body).into_response()
    }
}
