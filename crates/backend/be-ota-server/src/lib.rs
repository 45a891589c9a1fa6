use std::{net::SocketAddr, sync::Arc};

use be_ota_service::{OtaConfig, init_ota_service};
use be_release_db::DatabaseManager;
use be_storage::StorageService;

/// Configuration for running the OTA server.
pub struct ServerConfig {
    pub database_url: String,
    pub http_addr: SocketAddr,
    pub ota: OtaConfig,
    /// When this receiver gets a value, the server shuts down gracefully.
    pub shutdown: tokio::sync::watch::Receiver<()>,
}

pub async fn run_server(
    config: ServerConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let db_manager = match DatabaseManager::new(&config.database_url).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            tracing::error!("Cannot reach the release database: {}", e);
            return Err(e.into());
        }
    };

    let storage = Arc::new(StorageService::from_env()?);
    tracing::info!("Bundle storage backend: {}", storage.get_backend_name());

    let router = match init_ota_service(config.ota, db_manager, storage) {
        Ok(router) => router,
        Err(e) => {
            tracing::error!("Failed to initialize OTA service: {:#}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Starting HTTP server at {}", config.http_addr);

    let mut http_shutdown = config.shutdown.clone();
    let http_listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    let result = axum::serve(http_listener, router)
        .with_graceful_shutdown(async move {
            let _ = http_shutdown.changed().await;
            tracing::info!("Shutting down HTTP server...");
        })
        .await;

    if let Err(e) = result {
        tracing::error!("HTTP server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
