//! invoice_bidder - invoice factoring backend API
//!
//! Serves the bidding and trade endpoints. Runs on Postgres when
//! `DATABASE_URL` is set, otherwise on the in-memory store.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use invoice_bidder::api::{self, AppState};
use invoice_bidder::store::{FileAttachmentStore, MemoryStore, PgStore};
use invoice_bidder::{db, Config};

/// Initialize tracing/logging. `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "invoice_bidder=debug,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting invoice_bidder server");

    if config.is_production() && config.database_url.is_none() {
        return Err(anyhow::anyhow!("DATABASE_URL is required in production"));
    }

    let attachments = Arc::new(FileAttachmentStore::new(config.attachment_dir.clone()));

    let (state, pool) = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(database_url)
                .await?;

            if !db::check_schema(&pool).await? {
                tracing::error!("Database schema is not complete. Please run migrations.");
                return Err(anyhow::anyhow!("Database schema incomplete"));
            }
            tracing::info!("Database connected successfully");

            let store = Arc::new(PgStore::new(pool.clone()));
            let state =
                AppState::from_stores(store.clone(), store, attachments, config.broker_config())?;
            (state, Some(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            let store = Arc::new(MemoryStore::new());
            let state =
                AppState::from_stores(store.clone(), store, attachments, config.broker_config())?;
            (state, None)
        }
    };

    let broker = state.broker.clone();
    broker.start()?;

    let app = api::build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down, draining settlement queue...");
    let deadline = Instant::now() + config.shutdown_timeout;
    match broker.shutdown(deadline).await {
        Ok(()) => tracing::info!(stats = ?broker.stats(), "Settlement queue drained"),
        Err(e) => tracing::error!(error = %e, stats = ?broker.stats(), "Settlement queue not drained"),
    }

    if let Some(pool) = pool {
        pool.close().await;
        tracing::info!("Database connections closed");
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
