//! Release endpoints.
//!
//! - `GET /release/{id}` — last release metadata; `?all` lists every
//!   release, `?file` streams the last artifact
//! - `GET /release/{id}/{version}` — metadata for one version;
//!   `?file` streams its artifact

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::api::error::{ApiError, ApiResult};
use crate::api::jsend;
use crate::project::Project;
use crate::registry::Registry;
use crate::store::Release;

pub async fn project_release(
    State(registry): State<Arc<Registry>>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let project = registry.get(&id).ok_or(ApiError::NotFound)?;

    if params.contains_key("all") {
        return Ok(jsend::success(&project.releases()?));
    }

    let release = project.last_release()?;
    if params.contains_key("file") {
        return artifact_response(&project, &release);
    }
    Ok(jsend::success(&release))
}

pub async fn version_release(
    State(registry): State<Arc<Registry>>,
    Path((id, version)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let project = registry.get(&id).ok_or(ApiError::NotFound)?;

    let release = project.release_data(&version)?;
    if params.contains_key("file") {
        return artifact_response(&project, &release);
    }
    Ok(jsend::success(&release))
}

/// Streams the stored artifact bytes, named after the release file.
fn artifact_response(project: &Project, release: &Release) -> ApiResult<Response> {
    let data = project.release_file(&release.file_key)?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", release.file_name),
            ),
        ],
        data,
    )
        .into_response())
}
