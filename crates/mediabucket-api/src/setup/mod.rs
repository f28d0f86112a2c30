//! Application setup and initialization

pub mod routes;
pub mod server;

use crate::state::AppState;
use anyhow::{Context, Result};
use mediabucket_core::Config;
use mediabucket_storage::S3Store;
use std::sync::Arc;

/// Initialize telemetry, the bucket connection and the router
pub async fn initialize_app(config: &Config) -> Result<(Arc<AppState>, axum::Router)> {
    crate::telemetry::init_telemetry(config.log_json())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    if config.is_production() && config.storage().dev_mode {
        tracing::warn!(
            host = config.storage().host.as_deref().unwrap_or_default(),
            "S3 dev mode is enabled in production; objects are addressed path-style"
        );
    }

    let store = S3Store::connect(config.storage().clone())
        .await
        .context("Failed to set up S3 storage")?;
    tracing::info!(
        bucket = %config.storage().bucket,
        prefix = %config.storage().path_prefix,
        base_url = %config.storage().public_base_url(),
        "Storage initialized"
    );

    let state = Arc::new(AppState::new(store));
    let router = routes::setup_routes(config.serve_base_path(), state.clone());

    Ok((state, router))
}
