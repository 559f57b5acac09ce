//! Relaypool - Entry Point
//!
//! Starts the pool's background services and the admin API with graceful
//! shutdown support.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relaypool::api::ApiServer;
use relaypool::config::{Config, LogConfig, StoreBackend};
use relaypool::repository::{MemoryProxyStore, PgProxyStore, ProxyStore};
use relaypool::services::ServiceHandle;
use relaypool::{Database, ProxyPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(&config.log);

    info!("Starting relaypool");

    let (store, db): (Arc<dyn ProxyStore>, Option<Database>) = match config.database.backend {
        StoreBackend::Postgres => {
            let db = Database::new(&config)
                .await
                .context("failed to connect to database")?;
            db.run_migrations()
                .await
                .context("failed to run migrations")?;
            (Arc::new(PgProxyStore::new(db.pool().clone())), Some(db))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory proxy store; the pool is lost on restart");
            (Arc::new(MemoryProxyStore::new()), None)
        }
    };

    let pool = Arc::new(ProxyPool::from_config(store, &config).context("failed to build proxy pool")?);

    let (handle, api_shutdown) = ServiceHandle::new();
    let mut tasks = pool.spawn_background(&handle);

    let api_server = ApiServer::new(config.api.clone(), pool.clone());
    tasks.push(tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    }));

    info!("Relaypool started - API: {}", config.api_addr());

    shutdown_signal().await;
    info!("Shutdown signal received");

    handle.shutdown();
    for task in tasks {
        if let Err(e) = task.await {
            error!("Service task failed: {}", e);
        }
    }

    if let Some(db) = db {
        db.close().await;
    }

    info!("Relaypool stopped");
    Ok(())
}

/// `RUST_LOG` wins over `LOG_LEVEL`; `LOG_FORMAT=pretty` for human-readable output
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("relaypool={},tower_http=info", log.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if log.format.eq_ignore_ascii_case("pretty") {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
}
