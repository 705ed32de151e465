//! medhook webhook delivery service.
//!
//! Main entry point. Loads configuration, opens the store, starts the
//! delivery runtime and the HTTP API, and coordinates graceful shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use medhook_api::{AppState, Config};
use medhook_core::{
    storage::{memory::MemoryStore, postgres::PgStore},
    Clock, RealClock, WebhookStore,
};
use medhook_delivery::DeliveryEngine;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log)?;

    info!(
        database_url = config.database_url_masked().as_deref().unwrap_or("in-memory"),
        host = %config.host,
        port = config.port,
        worker_pool_size = config.worker_pool_size,
        "Starting medhook webhook delivery service"
    );

    let (store, pool) = open_store(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());

    let engine = Arc::new(
        DeliveryEngine::new(
            store,
            config.to_event_catalog()?,
            config.to_delivery_config(),
            clock.clone(),
        )
        .context("Failed to build delivery engine")?,
    );
    engine.start().await.context("Failed to start delivery engine")?;

    let state = AppState::new(engine.clone(), clock).with_request_timeout(config.request_timeout());
    let addr = config.parse_server_addr()?;

    if let Err(e) = medhook_api::start_server(state, addr, shutdown_signal()).await {
        error!(error = %e, "Server failed");
    }

    info!("Shutdown signal received, stopping delivery engine");
    if let Err(e) = engine.shutdown().await {
        error!(error = %e, "Delivery engine did not stop cleanly");
    }

    if let Some(pool) = pool {
        pool.close().await;
        info!("Database connections closed");
    }

    info!("medhook shutdown complete");
    Ok(())
}

/// Initializes tracing from the configured filter directives.
fn init_tracing(directives: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(directives).context("Invalid RUST_LOG directives")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Opens PostgreSQL when `DATABASE_URL` is set, otherwise the in-memory
/// store.
async fn open_store(config: &Config) -> Result<(Arc<dyn WebhookStore>, Option<sqlx::PgPool>)> {
    let Some(database_url) = config.database_url.as_deref() else {
        warn!("DATABASE_URL not set; deliveries will not survive a restart");
        return Ok((Arc::new(MemoryStore::new()), None));
    };

    let pool = create_database_pool(database_url, config.database_max_connections).await?;
    let store = PgStore::new(pool.clone());
    store.migrate().await.context("Failed to run database migrations")?;
    info!("Database schema ready");

    Ok((Arc::new(store), Some(pool)))
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(database_url: &str, max_connections: u32) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);
    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "Database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
