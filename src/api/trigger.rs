//! The trigger endpoint.
//!
//! `POST /trigger/{id}` wakes a project cycle with the
//! already-attempted-version check disabled. The response returns as
//! soon as the cycle is queued; if a cycle is already running, the
//! forced one starts once it finishes.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::api::jsend;
use crate::registry::Registry;

const SECRET_HEADER: &str = "x-trigger-secret";

#[derive(Debug, Default, Deserialize)]
struct TriggerRequest {
    #[serde(default)]
    secret: String,
}

pub async fn trigger(
    State(registry): State<Arc<Registry>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let project = registry.get(&id).ok_or(ApiError::NotFound)?;

    let request: TriggerRequest = if body.is_empty() {
        TriggerRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|err| {
            ApiError::BadRequest(format!(
                "We had trouble parsing your input, please check your input and try again: {}",
                err
            ))
        })?
    };

    let secret = project.trigger_secret();
    if !secret.is_empty() {
        let provided = if !request.secret.is_empty() {
            request.secret
        } else {
            headers
                .get(SECRET_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };

        if provided != secret {
            return Err(ApiError::BadRequest("Invalid trigger secret".to_string()));
        }
    }

    debug!("triggering a forced build for project {}", id);
    project.spawn_cycle(true);

    Ok(jsend::success(&format!("build triggered for project {}", id)))
}
