//! User import service - main entry point

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use userimport_common::logging::{init_logging, LogConfig};

use userimport_server::{
    api,
    config::Config,
    import::{
        bulk::PgBulkImporter,
        source::LocalSource,
        store::PgJobStore,
        worker::{ImportWorkerConfig, ImportWorkerPool},
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    let mut log_config = LogConfig::from_env().unwrap_or_default();
    if log_config.filter_directives.is_none() {
        log_config = log_config
            .with_filter_directives("userimport_server=debug,tower_http=debug,sqlx=warn");
    }
    init_logging(&log_config)?;

    info!("Starting user import service");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await?;

    info!("Database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    // Import worker pool, running beside the HTTP server
    let shutdown = CancellationToken::new();
    let worker_pool = Arc::new(ImportWorkerPool::new(
        Arc::new(PgJobStore::new(db_pool.clone())),
        Arc::new(LocalSource::new(config.import.base_dir.clone())),
        Arc::new(PgBulkImporter::new(db_pool.clone())),
        ImportWorkerConfig {
            workers: config.import.workers,
            chunk_size: config.import.chunk_size,
            lease_duration: Duration::from_secs(config.import.job_lease_seconds),
            ..ImportWorkerConfig::default()
        },
    ));
    let worker_handles = worker_pool.start(shutdown.clone());
    info!(workers = worker_handles.len(), "Import worker pool started");

    let app = api::router(db_pool, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    // Workers stop as soon as the signal arrives; in-flight jobs are
    // abandoned and reclaimed later through lease expiry.
    let worker_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            worker_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    let join_workers = async {
        for handle in worker_handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(
        Duration::from_secs(config.server.shutdown_timeout_secs),
        join_workers,
    )
    .await
    .is_err()
    {
        tracing::warn!("Timed out waiting for import workers to stop");
    }

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
