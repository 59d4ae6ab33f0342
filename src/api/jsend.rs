//! JSend response envelope.
//!
//! Every JSON response from the API is wrapped in
//! `{status, data?, message?, failures?, more?}` with
//! `Cache-Control: no-cache`. A `fail` status maps to a 4xx code and an
//! `error` status to 500.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAIL: &str = "fail";
pub const STATUS_ERROR: &str = "error";

#[derive(Debug, Serialize)]
pub struct JSend {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
    /// More data exists for this request.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub more: bool,
}

impl JSend {
    fn new(status: &'static str) -> JSend {
        JSend {
            status,
            data: None,
            message: None,
            failures: Vec::new(),
            more: false,
        }
    }
}

/// A 200 success envelope around `data`.
pub fn success<T: Serialize>(data: &T) -> Response {
    let value = match serde_json::to_value(data) {
        Ok(value) => value,
        Err(err) => {
            error!("error serializing response data: {}", err);
            return error("An internal server error has occurred");
        }
    };

    respond(
        StatusCode::OK,
        JSend {
            data: Some(value),
            ..JSend::new(STATUS_SUCCESS)
        },
    )
}

/// A failure caused by the request itself; safe to show the client.
pub fn fail(
    code: StatusCode,
    message: impl Into<String>,
    data: Option<serde_json::Value>,
) -> Response {
    respond(
        code,
        JSend {
            data,
            message: Some(message.into()),
            ..JSend::new(STATUS_FAIL)
        },
    )
}

/// A server-side error with a sanitized message.
pub fn error(message: impl Into<String>) -> Response {
    respond(
        StatusCode::INTERNAL_SERVER_ERROR,
        JSend {
            message: Some(message.into()),
            ..JSend::new(STATUS_ERROR)
        },
    )
}

fn respond(code: StatusCode, body: JSend) -> Response {
    (
        code,
        [(header::CACHE_CONTROL, "no-cache")],
        Json(body),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_shape() {
        let body = JSend {
            data: Some(serde_json::json!(["a", "b"])),
            ..JSend::new(STATUS_SUCCESS)
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"status": "success", "data": ["a", "b"]})
        );
    }

    #[test]
    fn test_empty_fields_are_omitted() {
        let json = serde_json::to_value(JSend::new(STATUS_ERROR)).unwrap();
        assert_eq!(json, serde_json::json!({"status": "error"}));
    }

    #[test]
    fn test_fail_maps_to_client_error() {
        let response = fail(StatusCode::BAD_REQUEST, "bad input", None);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-cache"
        );
    }

    #[test]
    fn test_error_maps_to_500() {
        let response = error("boom");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
