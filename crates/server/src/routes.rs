use axum::{
    body::Body,
    http::{Request, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{info_span, Level};

use common::types::{Health, Message};
use service::DatabaseRegistry;

pub mod databases;

/// Shared handler state: a cloneable handle to the registry.
#[derive(Clone)]
pub struct ServerState {
    pub registry: DatabaseRegistry,
}

pub async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn not_found() -> (StatusCode, Json<Message>) {
    (
        StatusCode::NOT_FOUND,
        Json(Message::new("This endpoint is not found or is currently disabled!")),
    )
}

async fn method_not_allowed() -> (StatusCode, Json<Message>) {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(Message::new(
            "Try setting the method to either GET, PUT, DELETE or POST. Check the documentation to see which endpoint accepts which kind of method.",
        )),
    )
}

/// Build the full application router
pub fn build_router(state: ServerState, cors: CorsLayer) -> Router {
    // known path, wrong method: JSON body instead of a bare 405
    let database_routes = Router::new()
        .route("/databases", post(databases::create_database).fallback(method_not_allowed))
        .route(
            "/databases/:name",
            get(databases::view_database)
                .delete(databases::delete_database)
                .fallback(method_not_allowed),
        )
        .route(
            "/databases/:name/download",
            get(databases::download_database).fallback(method_not_allowed),
        )
        .route("/databases/:name/search", get(databases::get_entry).fallback(method_not_allowed))
        .route("/databases/:name/entries", post(databases::add_entry).fallback(method_not_allowed))
        .route(
            "/databases/:name/entries/:key",
            put(databases::edit_entry)
                .delete(databases::delete_entry)
                .fallback(method_not_allowed),
        )
        .route("/query", get(databases::query_database).fallback(method_not_allowed))
        .route("/backup", post(databases::backup).fallback(method_not_allowed));

    Router::new()
        .route("/health", get(health).fallback(method_not_allowed))
        .merge(database_routes)
        .fallback(not_found)
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                // path only: the query string carries passcodes
                .make_span_with(|req: &Request<Body>| {
                    info_span!("request", method = %req.method(), path = %req.uri().path())
                })
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .include_headers(false),
                )
                // 5xx 以 ERROR 记录
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        )
}
