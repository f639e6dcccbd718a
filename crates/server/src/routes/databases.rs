//! HTTP handlers for databases and their entries.
//!
//! Handlers only extract parameters, call the registry and shape the response;
//! validation, passcode checks and persistence all happen in the core.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use common::types::Message;
use service::{names, ServiceError};

use super::ServerState;
use crate::errors::ApiError;

/// Header accepted when the `passcode` query parameter is absent.
pub const PASSCODE_HEADER: &str = "X-Passcode";

#[derive(Debug, Default, Deserialize)]
pub struct PasscodeQuery {
    pub passcode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateQuery {
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AddEntryQuery {
    pub key: Option<String>,
    pub passcode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub search_param: Option<String>,
    pub passcode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    pub database_name: Option<String>,
    pub search_param: Option<String>,
    pub passcode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedOutput {
    pub message: String,
    pub passcode: String,
    pub created_at: String,
}

/// Query parameter first, then the header.
fn passcode_from(query: Option<String>, headers: &HeaderMap) -> Option<String> {
    query.filter(|p| !p.is_empty()).or_else(|| {
        headers
            .get(PASSCODE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    })
}

fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|e| ServiceError::MalformedBody(e.to_string()).into())
}

fn ok(status: StatusCode, message: &str) -> (StatusCode, Json<Message>) {
    (status, Json(Message::new(message)))
}

pub async fn create_database(
    State(state): State<ServerState>,
    Query(q): Query<CreateQuery>,
) -> Result<(StatusCode, Json<CreatedOutput>), ApiError> {
    let name = names::require_name(q.name.as_deref())?;
    let created = state.registry.create(name).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedOutput {
            message: "Database created successfully.".into(),
            passcode: created.passcode,
            created_at: created.created_at.to_rfc3339(),
        }),
    ))
}

pub async fn add_entry(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    Query(q): Query<AddEntryQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let value = parse_body(&body)?;
    let passcode = passcode_from(q.passcode, &headers);
    let key = q.key.unwrap_or_default();
    state.registry.put(&name, &key, value, passcode.as_deref()).await?;
    Ok(ok(StatusCode::CREATED, "Data added to Database successfully."))
}

pub async fn view_database(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    Query(q): Query<PasscodeQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let passcode = passcode_from(q.passcode, &headers);
    let store = state.registry.get(&name, passcode.as_deref()).await?;
    Ok(Json(Value::Object(store)))
}

/// Same content as [`view_database`], served as a file attachment.
pub async fn download_database(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    Query(q): Query<PasscodeQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let passcode = passcode_from(q.passcode, &headers);
    let store = state.registry.get(&name, passcode.as_deref()).await?;
    let disposition = format!("attachment; filename=\"{name}.json\"");
    Ok(([(header::CONTENT_DISPOSITION, disposition)], Json(Value::Object(store))))
}

pub async fn delete_database(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    Query(q): Query<PasscodeQuery>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let passcode = passcode_from(q.passcode, &headers);
    state.registry.delete(&name, passcode.as_deref()).await?;
    Ok(ok(StatusCode::OK, "Database deleted successfully."))
}

pub async fn get_entry(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    Query(q): Query<SearchQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let passcode = passcode_from(q.passcode, &headers);
    let key = q.search_param.unwrap_or_default();
    let value = state.registry.get_entry(&name, &key, passcode.as_deref()).await?;
    Ok(Json(value))
}

pub async fn delete_entry(
    State(state): State<ServerState>,
    Path((name, key)): Path<(String, String)>,
    Query(q): Query<PasscodeQuery>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let passcode = passcode_from(q.passcode, &headers);
    state.registry.delete_entry(&name, &key, passcode.as_deref()).await?;
    Ok(ok(StatusCode::OK, "Data deleted successfully."))
}

pub async fn edit_entry(
    State(state): State<ServerState>,
    Path((name, key)): Path<(String, String)>,
    Query(q): Query<PasscodeQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let value = parse_body(&body)?;
    let passcode = passcode_from(q.passcode, &headers);
    state.registry.edit_entry(&name, &key, value, passcode.as_deref()).await?;
    Ok(ok(StatusCode::OK, "Data edited successfully."))
}

pub async fn query_database(
    State(state): State<ServerState>,
    Query(q): Query<QueryParams>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let name = names::require_name(q.database_name.as_deref())?;
    let passcode = passcode_from(q.passcode, &headers);
    let hits = state
        .registry
        .query(name, q.search_param.as_deref(), passcode.as_deref())
        .await?;
    info!(database = %name, matches = hits.len(), "query served");
    Ok(Json(Value::Object(hits)))
}

pub async fn backup(State(state): State<ServerState>) -> Result<(StatusCode, Json<Message>), ApiError> {
    state.registry.backup().await?;
    Ok(ok(StatusCode::OK, "Data backup completed successfully."))
}
