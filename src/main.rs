//! Transfer Saga Service - Main Application Entry Point
//!
//! REST API that accepts transfer intents and moves funds between two
//! accounts on an external ledger as a saga.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Store**: PostgreSQL with sqlx, or in-memory when no database is configured
//! - **Ledger**: HTTP ledger service, or the in-process sandbox when no URL is configured
//! - **Events**: In-process broadcast bus plus an optional signed webhook
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Open the transfer store (and run migrations)
//! 3. Assemble ledger client, saga drivers and event sinks
//! 4. Start the recovery scanner
//! 5. Serve HTTP until Ctrl-C, then stop the scanner

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use transfer_saga::app::{Saga, SagaSettings};
use transfer_saga::config::Config;
use transfer_saga::db;
use transfer_saga::ledger::{HttpLedgerApi, LedgerApi, SandboxLedger};
use transfer_saga::resilience::CircuitBreakerRegistry;
use transfer_saga::services::event_publisher::{ChannelEventSink, EventPublisher, EventSink};
use transfer_saga::services::webhook_service::WebhookEventSink;
use transfer_saga::store::{InMemoryTransferStore, PostgresTransferStore, TransferStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    let store: Arc<dyn TransferStore> = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await?;
            tracing::info!("Database pool created");
            db::run_migrations(&pool).await?;
            tracing::info!("Database migrations complete");
            Arc::new(PostgresTransferStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; transfers are kept in memory only");
            Arc::new(InMemoryTransferStore::new())
        }
    };

    let ledger: Arc<dyn LedgerApi> = match &config.ledger_base_url {
        Some(base_url) => {
            let client = reqwest::Client::builder().build()?;
            tracing::info!(base_url = %base_url, "Using ledger service");
            Arc::new(HttpLedgerApi::new(client, base_url)?)
        }
        None => {
            tracing::warn!("LEDGER_BASE_URL not set; using the in-process sandbox ledger");
            Arc::new(SandboxLedger::new())
        }
    };

    let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(ChannelEventSink::new())];
    if let Some((url, secret)) = config.webhook() {
        sinks.push(Arc::new(WebhookEventSink::new(url, secret)?));
        tracing::info!(url = %url, "Webhook event delivery enabled");
    }

    let saga = Saga::assemble(
        store,
        ledger,
        Arc::new(CircuitBreakerRegistry::new(config.breaker_config())),
        EventPublisher::new(sinks),
        SagaSettings {
            ledger: config.ledger_client_policy(),
            compensation: config.compensation_policy(),
            recovery: config.recovery_config(),
            deadline: config.saga_deadline(),
        },
    );

    let recovery = saga.scanner.clone().spawn();

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, saga.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    recovery.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
