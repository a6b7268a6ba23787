//! Axum-based HTTP gateway with body limits and request timeouts.

pub mod guard;
mod handlers;

use crate::config::Config;
use crate::ledger::IdempotencyLedger;
use crate::orders::OrderStore;
use crate::{db, sweeper};
use anyhow::Result;
use axum::{
    Router,
    routing::{get, post},
};
use handlers::{
    handle_create_order, handle_create_order_unsafe, handle_get_order, handle_health,
    handle_not_found,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB) — prevents memory exhaustion
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s) — prevents slow-loris attacks
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Endpoint identifier recorded in ledger rows for the guarded route.
pub(crate) const ORDERS_ENDPOINT: &str = "/api/v1/orders";

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<IdempotencyLedger>,
    pub orders: OrderStore,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/api/v1/orders", post(handle_create_order))
        .route("/api/v1/orders/non-idempotent", post(handle_create_order_unsafe))
        .route("/api/v1/orders/{id}", get(handle_get_order))
        .fallback(handle_not_found)
        .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .with_state(state)
}

/// Run the HTTP gateway.
pub async fn run_gateway(config: &Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    run_gateway_with_listener(listener, config).await
}

/// Run the HTTP gateway from a pre-bound listener.
pub async fn run_gateway_with_listener(
    listener: tokio::net::TcpListener,
    config: &Config,
) -> Result<()> {
    let pool = db::connect(&config.database_path).await?;
    let ledger = Arc::new(
        IdempotencyLedger::open(pool.clone(), config.idempotency.ledger_settings()).await?,
    );
    let orders = OrderStore::open(pool).await?;

    tokio::spawn(sweeper::run(
        Arc::clone(&ledger),
        Duration::from_secs(config.idempotency.sweep_interval_secs),
    ));

    let app = router(AppState { ledger, orders });

    tracing::info!("gateway listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received, stopping gateway");
}
