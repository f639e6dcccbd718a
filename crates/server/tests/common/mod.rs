#![allow(dead_code)]

use std::path::PathBuf;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use configs::StorageConfig;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use server::routes;

fn cors() -> tower_http::cors::CorsLayer { tower_http::cors::CorsLayer::very_permissive() }

/// Storage settings pointing at a fresh directory under the system temp dir.
pub fn temp_storage() -> StorageConfig {
    let dir = std::env::temp_dir().join(format!("osdb_test_{}", Uuid::new_v4()));
    StorageConfig { data_dir: dir.to_string_lossy().to_string(), ..StorageConfig::default() }
}

pub async fn build_app(storage: &StorageConfig) -> anyhow::Result<Router> {
    let state = server::build_state(storage).await?;
    Ok(routes::build_router(state, cors()))
}

pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> anyhow::Result<(StatusCode, Value)> {
    let body = match body {
        Some(v) => Body::from(serde_json::to_vec(&v)?),
        None => Body::empty(),
    };
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)?;
    send_request(app, req).await
}

pub async fn send_request(app: &Router, req: Request<Body>) -> anyhow::Result<(StatusCode, Value)> {
    let resp = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await?;
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
    Ok((status, json))
}

/// Create a database and return its passcode.
pub async fn create_db(app: &Router, name: &str) -> anyhow::Result<String> {
    let (status, body) = send(app, "POST", &format!("/databases?name={name}"), None).await?;
    assert_eq!(status, StatusCode::CREATED, "create {name}: {body}");
    Ok(body["passcode"].as_str().unwrap_or_default().to_string())
}

pub fn data_path(storage: &StorageConfig, file: &str) -> PathBuf {
    PathBuf::from(&storage.data_dir).join(file)
}

pub async fn cleanup(storage: &StorageConfig) {
    let _ = tokio::fs::remove_dir_all(&storage.data_dir).await;
}
