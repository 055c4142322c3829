//! Voucher ledger HTTP server.
//!
//! This binary:
//! - Connects to `PostgreSQL` and applies the ledger schema
//! - Wires the allocation, redemption and QR workflow services
//! - Spawns the background sweep that expires stale redemption intents
//! - Serves the HTTP API until Ctrl+C or SIGTERM
//!
//! # Usage
//!
//! ```bash
//! # Start infrastructure
//! docker compose up -d
//!
//! # Run server
//! cargo run --bin server
//! ```

use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voucher_core::catalog::StaticCatalog;
use voucher_core::clock::SystemClock;
use voucher_core::notify::LogDispatcher;
use voucher_core::service::RedemptionWorkflow;
use voucher_postgres::{run_migrations, PostgresLedgerStore};
use voucher_web::{build_router, AppState, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,voucher=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting voucher ledger server");

    // Load configuration
    let config = Config::from_env();
    info!(
        database = %config.database.url,
        addr = %config.bind_addr(),
        "Configuration loaded"
    );

    // Connect to PostgreSQL and apply the ledger schema
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    run_migrations(&pool).await?;
    info!("Ledger schema ready");

    // Wire services over the shared store
    let store = Arc::new(PostgresLedgerStore::from_pool(pool.clone()));
    let state = AppState::new(
        store,
        Arc::new(StaticCatalog::new()),
        Arc::new(LogDispatcher),
        Arc::new(SystemClock),
        config.redemption.qr_link_base.clone(),
    )
    .with_db(pool);

    spawn_intent_sweeper(
        state.workflow.clone(),
        chrono::Duration::minutes(config.redemption.intent_ttl_minutes),
        Duration::from_secs(config.redemption.sweep_interval_seconds),
    );

    // Build router
    let app = build_router(state);

    // Run server with graceful shutdown
    let listener = tokio::net::TcpListener::bind(&config.bind_addr()).await?;
    info!("Server listening on {}", config.bind_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Spawn the background task that expires intents pending longer than `ttl`.
///
/// Ticks are skipped, not bunched, when a sweep overruns the interval.
/// Sweep failures are logged and retried at the next tick.
fn spawn_intent_sweeper(
    workflow: Arc<RedemptionWorkflow>,
    ttl: chrono::Duration,
    sweep_interval: Duration,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(error) = workflow.expire_stale(ttl).await {
                tracing::warn!(error = %error, "intent sweep failed");
            }
        }
    });
    info!(
        ttl_minutes = ttl.num_minutes(),
        interval_seconds = sweep_interval.as_secs(),
        "Intent sweeper started"
    );
}

/// Wait for a shutdown signal.
///
/// Waits for:
/// - Ctrl+C (SIGINT)
/// - SIGTERM (in production environments)
#[allow(clippy::expect_used)] // Signal handler installation failure is unrecoverable at startup
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
