//! Core library for the ephemeral file store: upload and retrieval engines,
//! the expiry reclaimer, and the HTTP routes in front of them.

pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod files;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use database::{get_database_pool, DatabaseManager};
pub use error::{AppError, Result};
pub use files::{
    BlobStore, FileDescriptor, FileManager, FileManagerConfig, FileRecord, FileRepository,
    FileRepositoryTrait, FileStatus, Reclaimer, ReclaimerHandle, ReclaimerState, RecoveryReport,
    SweepReport,
};
pub use handlers::routes::create_routes;

use axum::{extract::DefaultBodyLimit, Router};
use std::net::SocketAddr;
use tokio::signal;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub app_name: String,
    pub version: String,
    pub file_manager: FileManager,
    pub db_manager: Option<DatabaseManager>,
    pub reclaimer: Option<Reclaimer>,
}

impl AppState {
    pub fn new(file_manager: FileManager) -> Self {
        Self {
            app_name: "TempFiles".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            file_manager,
            db_manager: None,
            reclaimer: None,
        }
    }

    pub fn with_database(mut self, db_manager: DatabaseManager) -> Self {
        self.db_manager = Some(db_manager);
        self
    }

    /// The reclaimer shares its state with the task started from a clone.
    pub fn with_reclaimer(mut self, reclaimer: Reclaimer) -> Self {
        self.reclaimer = Some(reclaimer);
        self
    }
}

pub fn create_app_with_config(state: AppState, config: &AppConfig) -> Router {
    // Size limits are enforced while streaming into the blob store.
    let mut router = create_routes().layer(DefaultBodyLimit::disable());

    if config.http.enable_cors {
        router = router.layer(middleware::cors_layer_from_config(&config.http));
    }

    if config.http.enable_logging {
        router = middleware::with_request_logging(router);
    }

    router.with_state(state)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<()> {
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
