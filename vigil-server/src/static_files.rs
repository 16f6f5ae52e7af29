use axum::{
    body::Body,
    http::{header, Response, StatusCode},
    response::IntoResponse,
};
use std::path::Path;
use tracing::debug;

pub const INDEX_FILE: &str = "index.html";

/// Serve `index.html` from `static_dir`, or 404 when it is absent.
pub async fn serve_index(static_dir: &Path) -> impl IntoResponse {
    let path = static_dir.join(INDEX_FILE);
    match tokio::fs::read(&path).await {
        Ok(contents) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            contents,
        )
            .into_response(),
        Err(e) => {
            debug!("Static index {:?} unavailable: {}", path, e);
            let mut response = Response::new(Body::from("Not found"));
            *response.status_mut() = StatusCode::NOT_FOUND;
            response.into_response()
        }
    }
}
