#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode},
};
use http_body_util::BodyExt;
use rust_chunk_backend::config::UploadConfig;
use rust_chunk_backend::services::storage::{LocalStorageService, StorageService};
use rust_chunk_backend::{AppState, create_app};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "----chunkboundary7MA4YWxkTrZu0gW";

pub struct TestApp {
    pub dir: TempDir,
    pub state: AppState,
    pub app: Router,
}

pub async fn setup() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = UploadConfig::development(dir.path());
    let storage = Arc::new(
        LocalStorageService::new(&config.upload_dir, &config.staging_dir)
            .await
            .unwrap(),
    );
    setup_with(dir, storage, config)
}

pub fn setup_with(dir: TempDir, storage: Arc<dyn StorageService>, config: UploadConfig) -> TestApp {
    let state = AppState::new(storage, config);
    let app = create_app(state.clone());
    TestApp { dir, state, app }
}

/// Builds a multipart/form-data body by hand: text fields first, then the
/// binary `file` part.
pub fn multipart_body(fields: &[(&str, &str)], file: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
        );
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"file\"; filename=\"blob\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(file);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub async fn send_chunk(
    app: &Router,
    filename: &str,
    data: &[u8],
    is_last_chunk: bool,
) -> Response<Body> {
    let last = if is_last_chunk { "true" } else { "false" };
    send_form(app, &[("filename", filename), ("isLastChunk", last)], data).await
}

pub async fn send_form(app: &Router, fields: &[(&str, &str)], data: &[u8]) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload")
                .header(
                    "Content-Type",
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(multipart_body(fields, data)))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn check_file(app: &Router, filename: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/check-file")
                .header("Content-Type", "application/json")
                .body(Body::from(
                    serde_json::json!({ "filename": filename }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
