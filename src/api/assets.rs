//! Embedded web assets.
//!
//! The dashboard is compiled into the binary so a deployment is a
//! single file; anything that is not a known asset gets the JSON 404.

use axum::http::{header, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};

use crate::api::jsend;

static INDEX_HTML: &str = include_str!("../../web/index.html");
static STYLE_CSS: &str = include_str!("../../web/style.css");

pub async fn serve(uri: Uri) -> Response {
    match uri.path() {
        "/" | "/index.html" => Html(INDEX_HTML).into_response(),
        "/style.css" => (
            [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
            STYLE_CSS,
        )
            .into_response(),
        path => jsend::fail(
            StatusCode::NOT_FOUND,
            "Resource not found",
            Some(serde_json::json!(path)),
        ),
    }
}
