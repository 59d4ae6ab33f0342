//! The HTTP surface.
//!
//! Read endpoints for projects, versions, logs, and releases, plus the
//! build trigger and the embedded dashboard. Each submodule handles one
//! resource.

pub mod assets;
pub mod error;
pub mod jsend;
pub mod log;
pub mod release;
pub mod trigger;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::registry::Registry;

/// Request bodies larger than this are rejected.
const MAX_REQUEST_SIZE: usize = 1 << 20;

pub fn create_router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/log", get(log::list_projects))
        .route("/log/", get(log::list_projects))
        .route("/log/{id}", get(log::project_versions))
        .route("/log/{id}/{version}", get(log::version_log))
        .route("/log/{id}/{version}/{stage}", get(log::stage_log))
        .route("/release/{id}", get(release::project_release))
        .route("/release/{id}/{version}", get(release::version_release))
        .route("/trigger/{id}", post(trigger::trigger))
        .fallback(assets::serve)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_SIZE))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}
