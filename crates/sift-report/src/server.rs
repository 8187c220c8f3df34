//! Preview server for generated reports.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path as AxumPath, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::Local;
use sift_storage::ReportStore;
use tokio::net::TcpListener;
use tracing::info;

use crate::{index_entries, render_index, REPORT_PREFIX};

#[derive(Clone)]
pub struct AppState {
    pub output_dir: PathBuf,
}

impl AppState {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/reports/{name}", get(report_handler))
        .with_state(Arc::new(state))
}

pub fn port_from_env() -> u16 {
    std::env::var("SIFT_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000)
}

pub async fn serve(output_dir: impl Into<PathBuf>, port: u16) -> anyhow::Result<()> {
    let state = AppState::new(output_dir);
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, output_dir = %state.output_dir.display(), "serving reports");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let store = ReportStore::new(&state.output_dir);
    let names = match store.list_files(REPORT_PREFIX, "html").await {
        Ok(names) => names,
        Err(err) => return server_error(err),
    };
    match render_index(&index_entries(names), "reports/", Local::now().naive_local()) {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(err),
    }
}

async fn report_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
) -> Response {
    let Some(content_type) = servable_content_type(&name) else {
        return not_found();
    };
    match tokio::fs::read(state.output_dir.join(&name)).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type)], bytes).into_response(),
        Err(_) => not_found(),
    }
}

/// Only plain file names of generated artifacts are served.
fn servable_content_type(name: &str) -> Option<&'static str> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return None;
    }
    if name.ends_with(".html") {
        Some("text/html; charset=utf-8")
    } else if name.ends_with(".csv") {
        Some("text/csv; charset=utf-8")
    } else {
        None
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Html("Report not found".to_string())).into_response()
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn get_request(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn index_lists_reports_under_the_reports_route() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("result_19_10_2026_07_00.html"), "<p>r</p>").unwrap();
        std::fs::write(dir.path().join("index.html"), "stale").unwrap();

        let resp = app(AppState::new(dir.path())).oneshot(get_request("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("result_19_10_2026_07_00.html"));
        assert!(text.contains("เวลา 07:00"));
        assert!(!text.contains("stale"));
    }

    #[tokio::test]
    async fn index_renders_without_an_output_directory() {
        let dir = tempdir().unwrap();
        let resp = app(AppState::new(dir.path().join("missing")))
            .oneshot(get_request("/"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("ยังไม่มีรายงาน"));
    }

    #[tokio::test]
    async fn report_route_serves_generated_files_only() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("result_19_10_2026_07_00.html"), "<p>report</p>").unwrap();
        std::fs::write(dir.path().join("missing_items_final.csv"), "a\n1\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "secret").unwrap();
        let app = app(AppState::new(dir.path()));

        let resp = app
            .clone()
            .oneshot(get_request("/reports/result_19_10_2026_07_00.html"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "text/html; charset=utf-8"
        );
        assert_eq!(body_text(resp).await, "<p>report</p>");

        let csv = app
            .clone()
            .oneshot(get_request("/reports/missing_items_final.csv"))
            .await
            .unwrap();
        assert_eq!(csv.status(), StatusCode::OK);

        for uri in [
            "/reports/notes.txt",
            "/reports/absent.html",
            "/reports/..%2Fnotes.txt",
            "/reports/.hidden.html",
        ] {
            let resp = app.clone().oneshot(get_request(uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[test]
    fn servable_names_are_plain_artifacts() {
        assert_eq!(servable_content_type("index.html"), Some("text/html; charset=utf-8"));
        assert_eq!(servable_content_type("x.csv"), Some("text/csv; charset=utf-8"));
        assert_eq!(servable_content_type("a/b.html"), None);
        assert_eq!(servable_content_type("..\\b.html"), None);
        assert_eq!(servable_content_type("b.exe"), None);
    }
}
