//! payflow_core - Money Movement & Risk Control API
//!
//! Wires the engines over the configured stores and serves the HTTP
//! surface. With DATABASE_URL set the ledger runs on Postgres; without it
//! the in-memory stores back a single-process deployment.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, Router};
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payflow_core::api::{self, AppState};
use payflow_core::clock::SystemClock;
use payflow_core::device::DeviceTrustManager;
use payflow_core::handlers::{ReceiveHandler, TransferHandler};
use payflow_core::jobs::JobScheduler;
use payflow_core::ledger::LedgerEngine;
use payflow_core::limits::LimitEnforcer;
use payflow_core::notify::{NotificationDispatcher, TracingSink};
use payflow_core::ratelimit::RateLimiter;
use payflow_core::risk::RiskEngine;
use payflow_core::store::{
    AccountStore, BeneficiaryStore, MemoryLedgerStore, MemoryTtlStore, PgLedgerStore,
    TransactionIndex,
};
use payflow_core::Config;

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "payflow_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the application state over the configured stores.
async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let config = Arc::new(config);
    let clock = Arc::new(SystemClock::new());

    let (accounts, beneficiaries, index): (
        Arc<dyn AccountStore>,
        Arc<dyn BeneficiaryStore>,
        Arc<dyn TransactionIndex>,
    ) = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await?;
            let store = Arc::new(PgLedgerStore::new(pool));
            (store.clone(), store.clone(), store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; ledger state is in-memory only");
            let store = Arc::new(MemoryLedgerStore::new());
            (store.clone(), store.clone(), store)
        }
    };

    let ttl_store = Arc::new(MemoryTtlStore::new(clock.clone()));

    let limits = Arc::new(LimitEnforcer::new(
        index.clone(),
        clock.clone(),
        config.limit_policy(),
    ));
    let devices = Arc::new(DeviceTrustManager::new(
        ttl_store.clone(),
        clock.clone(),
        chrono::Duration::days(config.device_trust_days),
        chrono::Duration::minutes(config.session_ttl_minutes),
    ));
    let risk = Arc::new(RiskEngine::new(
        index.clone(),
        devices.clone(),
        clock.clone(),
        config.limit_policy(),
        config.risk_params(),
    ));
    let ledger = Arc::new(LedgerEngine::new(
        accounts.clone(),
        beneficiaries,
        limits.clone(),
        config.fee_policy(),
        clock.clone(),
    ));
    let rate_limiter = Arc::new(RateLimiter::new(
        ttl_store.clone(),
        clock.clone(),
        chrono::Duration::seconds(config.rate_limit_window_secs),
        chrono::Duration::seconds(config.rate_limit_lockout_secs),
    ));
    let notifier = NotificationDispatcher::start(Arc::new(TracingSink));

    let transfers = Arc::new(TransferHandler::new(
        rate_limiter.clone(),
        limits,
        risk,
        devices.clone(),
        ledger.clone(),
        index,
        notifier.clone(),
        config.rate_limit_max_attempts,
    ));
    let receives = Arc::new(ReceiveHandler::new(
        rate_limiter.clone(),
        ledger,
        notifier,
        config.rate_limit_max_attempts,
    ));

    JobScheduler::new(ttl_store, clock).start();

    Ok(AppState {
        config,
        transfers,
        receives,
        devices,
        rate_limiter,
        accounts,
    })
}

/// Build the application router
fn build_router(state: AppState) -> Router {
    let api_router = api::create_router();

    // Axum layers run in reverse order of addition:
    // logging -> context -> rate_limit -> handler
    let protected_routes = api_router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::middleware::rate_limit_middleware,
        ))
        .layer(middleware::from_fn(api::middleware::context_middleware))
        .layer(middleware::from_fn(api::middleware::logging_middleware));

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .nest("/api/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("Starting payflow_core server");

    let state = build_state(config).await?;
    let app = build_router(state);

    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
