//! Log endpoints.
//!
//! - `GET /log` — every project, as a summary projection
//! - `GET /log/{id}` — versions seen for a project
//! - `GET /log/{id}/{version}` — all log entries for a version
//! - `GET /log/{id}/{version}/{stage}` — a single stage's log entry

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::Response;

use crate::api::error::{ApiError, ApiResult};
use crate::api::jsend;
use crate::registry::Registry;

pub async fn list_projects(State(registry): State<Arc<Registry>>) -> ApiResult<Response> {
    let list = registry.web_list()?;
    Ok(jsend::success(&list))
}

pub async fn project_versions(
    State(registry): State<Arc<Registry>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let project = registry.get(&id).ok_or(ApiError::NotFound)?;
    Ok(jsend::success(&project.versions()?))
}

pub async fn version_log(
    State(registry): State<Arc<Registry>>,
    Path((id, version)): Path<(String, String)>,
) -> ApiResult<Response> {
    let project = registry.get(&id).ok_or(ApiError::NotFound)?;
    Ok(jsend::success(&project.version_log(&version)?))
}

pub async fn stage_log(
    State(registry): State<Arc<Registry>>,
    Path((id, version, stage)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let project = registry.get(&id).ok_or(ApiError::NotFound)?;
    Ok(jsend::success(&project.stage_log(&version, &stage)?))
}
