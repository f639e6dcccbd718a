//! Runtime environment helpers
//!
//! Thin wrapper around `common::env` so binary crates can prepare the data
//! directory through `service::runtime` without depending directly on `common`.

/// Ensure the data directory exists before the registry loads from it.
pub async fn ensure_env(data_dir: &str) -> anyhow::Result<()> {
    common::env::ensure_data_dir(data_dir).await
}
