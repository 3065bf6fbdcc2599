use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use uuid::Uuid;

mod config;
mod database;
mod errors;
mod handlers;
mod middleware;
mod models;
mod repository;
mod routes;
mod services;
mod state;
mod telemetry;

use repository::document_repository::SqliteDocumentRepository;
use routes::routes::HttpLimits;
use services::{document_service::DocumentService, local_store::LocalObjectStore};
use state::AppState;

const METRICS_UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    // --- Logging + trace export ---
    let telemetry = telemetry::init(cfg.log_json, &cfg.otel)?;

    tracing::info!("Starting document-api with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage.dir).exists() {
        std::fs::create_dir_all(&cfg.storage.dir)
            .with_context(|| format!("creating storage directory {}", cfg.storage.dir))?;
        tracing::info!("Created storage directory at {}", cfg.storage.dir);
    }

    // --- Initialize SQLite connection + schema ---
    let db = database::connect(&cfg.database).await?;
    database::ensure_migrated(&db).await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        telemetry.shutdown();
        return Ok(()); // exit after migration
    }

    // --- Initialize object store + core service ---
    let secret = match &cfg.storage.presign_secret {
        Some(secret) => secret.clone(),
        None => {
            tracing::warn!(
                "DOCAPI_PRESIGN_SECRET not set; presigned links will not survive a restart"
            );
            format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
        }
    };
    let blobs = Arc::new(LocalObjectStore::new(
        &cfg.storage.dir,
        cfg.storage.public_url.clone(),
        secret.into_bytes(),
    ));
    let repo = Arc::new(SqliteDocumentRepository::new(db.clone()));
    let documents = DocumentService::new(blobs.clone(), repo)
        .with_rollback_timeout(cfg.rollback_timeout);

    // --- Prometheus recorder ---
    let metrics = middleware::http_metrics::prometheus_handle()?;
    let upkeep = metrics.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(METRICS_UPKEEP_INTERVAL);
        loop {
            ticker.tick().await;
            upkeep.run_upkeep();
        }
    });

    let state = AppState {
        documents,
        blobs,
        db: db.clone(),
        metrics,
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(HttpLimits {
        request_timeout: cfg.request_timeout,
        max_upload_bytes: cfg.max_upload_bytes,
    })
    .with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    tracing::info!("Server stopped");
    telemetry.shutdown();
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
