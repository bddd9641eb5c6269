//! Donora API Server
//!
//! Main entry point for the Donora backend service.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use donora_api::{AppState, Attachments, create_router};
use donora_core::storage::{StorageConfig, StorageService};
use donora_db::connect_with;
use donora_shared::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "donora=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = AppConfig::load().expect("Failed to load configuration");

    // Connect to database
    let db = connect_with(&config.database).await?;
    info!("Connected to database");

    // Create storage service and attachment reconcilers
    let storage = match &config.storage {
        Some(settings) => {
            let service = StorageService::from_config(StorageConfig::from_settings(settings))?;
            info!(provider = service.provider_name(), "Storage service configured");
            Some(Arc::new(service))
        }
        None => {
            warn!("Storage is not configured, attachment routes will answer 503");
            None
        }
    };
    let attachments = storage
        .as_ref()
        .map(|storage| Attachments::new(&db, Arc::clone(storage), &config.sync));
    let transfers = attachments.as_ref().map(|a| a.transfers.clone());

    // Create application state
    let state = AppState {
        storage,
        attachments,
        max_upload_bytes: config.server.max_upload_bytes,
    };

    // Create router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let post-commit uploads and destroys finish
    if let Some(transfers) = transfers {
        let grace = Duration::from_secs(config.sync.transfer_timeout_secs);
        let abandoned = transfers.shutdown(grace).await;
        info!(abandoned, stats = ?transfers.stats(), "Transfers drained");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
