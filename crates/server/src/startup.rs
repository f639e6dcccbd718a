use std::{net::SocketAddr, sync::Arc};

use axum::Router;
use configs::{AppConfig, StorageConfig};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::errors::StartupError;
use crate::routes::{self, ServerState};
use service::{
    runtime,
    storage::{JsonFileStore, StoragePaths},
    DatabaseRegistry, RegistryOptions,
};

fn build_cors() -> CorsLayer {
    CorsLayer::very_permissive()
}

fn bind_addr(cfg: &AppConfig) -> Result<SocketAddr, StartupError> {
    let addr = cfg.server.bind_addr();
    addr.parse()
        .map_err(|e| StartupError::InvalidConfig(format!("server address {addr}: {e}")))
}

/// Open the registry over the JSON files named by `storage`.
pub async fn build_state(storage: &StorageConfig) -> anyhow::Result<ServerState> {
    runtime::ensure_env(&storage.data_dir).await?;
    let paths = StoragePaths {
        registry: storage.registry_path(),
        credentials: storage.credentials_path(),
        backup: storage.backup_path(),
    };
    let backend = Arc::new(JsonFileStore::new(paths));
    let registry = DatabaseRegistry::open(backend, RegistryOptions { flush_on_read: storage.flush_on_read }).await;
    Ok(ServerState { registry })
}

/// Build the app from configuration and run the HTTP server
pub async fn run(cfg: AppConfig) -> Result<(), StartupError> {
    let state = build_state(&cfg.storage).await?;
    let databases = state.registry.database_count().await;
    info!(databases = databases, data_dir = %cfg.storage.data_dir, "registry ready");

    let app: Router = routes::build_router(state, build_cors());

    let addr = bind_addr(&cfg)?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr: addr.to_string(), source })?;
    info!(%addr, "starting server");
    axum::serve(listener, app).await.map_err(StartupError::Serve)?;
    Ok(())
}
