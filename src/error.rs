use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

/// `{"error":{"message":...}}`, shared by handlers and the rate limit gate
pub fn error_body(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": { "message": message } })
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Invalid credentials")]
    Unauthorized,
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Internal(detail) => {
                error!(detail = %detail, "Request failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(error_body("Internal server error")),
                )
                    .into_response();
            }
        };
        (status, Json(error_body(&self.to_string()))).into_response()
    }
}
