//! API error handling.
//!
//! Client mistakes become `fail` responses with their real message;
//! anything internal is logged server-side and surfaced as a generic
//! `error` response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::api::jsend;
use crate::store::StoreError;

#[derive(Debug)]
pub enum ApiError {
    /// The requested project, version, stage, or file does not exist.
    NotFound,
    /// The request itself was wrong; the message is safe to expose.
    BadRequest(String),
    /// An internal problem; the cause is logged, not exposed.
    Internal(StoreError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> ApiError {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound => {
                jsend::fail(StatusCode::NOT_FOUND, "Resource not found", None)
            }
            ApiError::BadRequest(message) => {
                jsend::fail(StatusCode::BAD_REQUEST, message, None)
            }
            ApiError::Internal(err) => {
                error!("error from a web request: {}", err);
                jsend::error("An internal server error has occurred")
            }
        }
    }
}
