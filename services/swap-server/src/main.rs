//! Token Swap Server
//!
//! Single-binary Rust service that:
//! 1. Loads client credentials and the refresh-token key at startup
//! 2. Accepts `POST /swap` (authorization code) and `POST /refresh`
//!    (encrypted refresh token) as form posts
//! 3. Calls the authorization server's token endpoint with Basic client auth
//! 4. Returns the token set with any refresh token encrypted

mod config;
mod metrics;
mod relay;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::extract::rejection::FormRejection;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use token_relay::{CipherBox, ExchangeService, TokenClient};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::relay::{RefreshForm, RelayState, SwapForm};

/// Drain timeout for graceful shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    relay: RelayState,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// A concurrency limit layer caps in-flight requests at `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/swap", post(swap_handler))
        .route("/refresh", post(refresh_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting token-swap-server");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder()?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    match &config_path {
        Some(path) => info!(path = %path.display(), "loading configuration"),
        None => info!("no config file, using environment only"),
    }

    let config = Config::load(config_path.as_deref()).context("failed to load configuration")?;

    info!(
        listen_addr = %config.listen_addr(),
        token_url = %config.oauth.token_url,
        algorithm = %config.encryption.algorithm,
        redirect_uri = config.oauth.redirect_uri.is_some(),
        timeout_secs = config.server.timeout_secs,
        "configuration loaded"
    );

    // Bad key material is fatal here rather than a per-request failure
    let cipher = CipherBox::new(&config.cipher()?)
        .context("refusing to start: invalid encryption settings")?;
    info!(algorithm = %cipher.algorithm(), "refresh-token cipher ready");

    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let token_client = TokenClient::new(
        http,
        config.oauth.token_url.clone(),
        &config.credentials()?,
        config.timeout(),
    );
    let exchange = ExchangeService::new(
        Arc::new(token_client),
        Arc::new(cipher),
        config.oauth.redirect_uri.clone(),
    );

    let app_state = AppState {
        relay: RelayState {
            exchange: Arc::new(exchange),
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
        },
        started_at: Instant::now(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.listen_addr();
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // Graceful shutdown: the drain timer starts when the signal fires, so a
    // slow client cannot block process exit.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

fn request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

/// `POST /swap`: authorization code for tokens.
async fn swap_handler(
    State(state): State<AppState>,
    form: Result<Form<SwapForm>, FormRejection>,
) -> Response {
    let form = form.ok().map(|Form(f)| f);
    relay::swap(&state.relay, form, request_id()).await
}

/// `POST /refresh`: encrypted refresh token for a new access token.
async fn refresh_handler(
    State(state): State<AppState>,
    form: Result<Form<RefreshForm>, FormRejection>,
) -> Response {
    let form = form.ok().map(|Form(f)| f);
    relay::refresh(&state.relay, form, request_id()).await
}

/// Liveness and request counters. The relay holds no connections of its
/// own, so it is healthy whenever it can answer.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "requests_served": state.relay.requests_total.load(Ordering::Relaxed),
        "errors_total": state.relay.errors_total.load(Ordering::Relaxed),
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
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
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
