//! HTTP error types with a minimal structured-response mapping across
//! the status codes this API surface actually uses
//! (200/204/206/400/403/404/416). Every rejection path (auth, malformed
//! Range, missing file) returns without a body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("range not satisfiable")]
    RangeNotSatisfiable { total_len: u64 },
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Forbidden => StatusCode::FORBIDDEN.into_response(),
            ApiError::NotFound => StatusCode::NOT_FOUND.into_response(),
            ApiError::BadRequest(detail) => {
                tracing::debug!(detail = %detail, "bad request");
                StatusCode::BAD_REQUEST.into_response()
            }
            ApiError::RangeNotSatisfiable { total_len } => {
                let mut response = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
                if let Ok(val) = axum::http::HeaderValue::from_str(&format!("bytes */{total_len}")) {
                    response.headers_mut().insert(axum::http::header::CONTENT_RANGE, val);
                }
                response
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "internal API error");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

impl From<crate::db::DatabaseError> for ApiError {
    fn from(err: crate::db::DatabaseError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ApiError::NotFound,
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
