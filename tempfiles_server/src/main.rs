//! Main entry point for the TempFiles server binary

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfiles_core::{
    create_app_with_config, get_database_pool, run_server, utils::format_bytes, AppConfig,
    AppState, BlobStore, DatabaseManager, FileManager, FileManagerConfig, FileRepository,
    Reclaimer,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    config.create_directories()
        .map_err(|e| anyhow::anyhow!("Failed to create directories: {}", e))?;

    let addr: SocketAddr = config.bind_address().parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address: {}", e))?;

    log_startup_info(&config);

    let (file_manager, db_manager) = initialize_storage(&config).await?;

    let reclaimer = Reclaimer::new(file_manager.clone(), config.cleanup_interval());
    let reclaimer_handle = reclaimer.clone().start();

    let state = AppState::new(file_manager)
        .with_database(db_manager)
        .with_reclaimer(reclaimer);
    let app = create_app_with_config(state, &config);

    run_server(app, addr).await?;

    info!("Stopping reclaimer");
    reclaimer_handle.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

async fn initialize_storage(config: &AppConfig) -> Result<(FileManager, DatabaseManager)> {
    let pool = get_database_pool(&config.database.url, config.database.max_connections).await
        .map_err(|e| anyhow::anyhow!("Failed to create database pool: {}", e))?;

    let repository = FileRepository::new(pool.clone());
    repository.create_table().await
        .map_err(|e| anyhow::anyhow!("Failed to create ledger table: {}", e))?;

    let blobs = BlobStore::new(&config.storage.upload_dir);
    let file_manager = FileManager::new(
        FileManagerConfig::from(config),
        blobs,
        Arc::new(repository),
    );

    let report = file_manager.initialize().await
        .map_err(|e| anyhow::anyhow!("Failed to initialize file storage: {}", e))?;
    if report.orphan_blobs_removed > 0 || report.orphan_records_removed > 0 {
        tracing::warn!(
            "Recovered from unclean shutdown: {} orphaned blobs, {} orphaned records removed",
            report.orphan_blobs_removed,
            report.orphan_records_removed
        );
    }

    Ok((file_manager, DatabaseManager::new(pool)))
}

fn log_startup_info(config: &AppConfig) {
    info!("TempFiles server configuration:");
    info!("  Environment: {}", config.server.environment);
    info!("  Bind address: {}", config.bind_address());
    info!("  Public URL: {}", config.storage.public_url);
    info!("  Upload directory: {}", config.storage.upload_dir.display());
    info!("  Ledger database: {}", config.database.url);
    info!("  Max file size: {}", format_bytes(config.storage.max_file_size));
    info!("  File expiry: {} hour(s)", config.storage.file_expiry_hours);
    info!("  Cleanup interval: {} second(s)", config.storage.cleanup_interval_seconds);
    info!("  Delete on download: {}", config.storage.delete_on_download);
    info!("  CORS enabled: {}", config.http.enable_cors);
    info!("  Request logging enabled: {}", config.http.enable_logging);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            let default_level = if cfg!(debug_assertions) {
                "debug"
            } else {
                "info"
            };

            format!(
                "{}={},tempfiles_core={},tower_http=info,sqlx=warn",
                env!("CARGO_CRATE_NAME").replace('-', "_"),
                default_level,
                default_level
            ).into()
        });

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let is_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    if is_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.pretty())
            .init();
    }
}
