//! Over-the-air update service
//!
//! Serves JavaScript bundle updates to mobile runtimes speaking the Expo
//! updates protocol (versions 0 and 1): signed manifests, roll-back and
//! no-update directives, content-addressed assets, and bundle uploads that
//! publish one archive under several runtime versions.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use be_release_db::DatabaseManager;
use be_storage::StorageService;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::debug;

pub mod archive;
pub mod config;
pub mod content;
pub mod directive;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod locator;
pub mod manifest;
pub mod service;
pub mod signing;
pub mod store;
pub mod types;
pub mod upload;
pub mod wire;

#[cfg(test)]
mod testing;

use service::AppState;

/// Create the axum router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = match &state.config().cors_allowed_origins {
        Some(origins) => CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins.clone()))
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    };
    let upload_limit = state.config().upload_max_bytes;

    Router::new()
        .route("/api/manifest", get(handlers::manifest_handler))
        .route("/api/assets", get(handlers::asset_handler))
        .route(
            "/api/upload",
            post(handlers::upload_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/health", get(handlers::health_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Initialize the OTA service over the given stores and return the router
pub fn init_ota_service(
    config: config::OtaConfig,
    database: Arc<DatabaseManager>,
    storage: Arc<StorageService>,
) -> Result<Router> {
    debug!(
        "Initializing OTA service for {} with {} storage",
        config.hostname,
        storage.get_backend_name()
    );

    let state = Arc::new(
        AppState::new(config, database, storage).context("Failed to create application state")?,
    );

    Ok(create_router(state))
}

// Re-export commonly used types
pub use config::OtaConfig;
pub use engine::{ProtocolEngine, UpdateOutcome};
pub use error::{ErrorResponse, OtaError};
pub use signing::ManifestSigner;
pub use store::{BundleStore, ReleaseStore};
pub use types::{HealthResponse, ManifestRequest, ProtocolVersion, UploadResponse};
