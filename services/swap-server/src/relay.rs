//! `/swap` and `/refresh` request handling
//!
//! Thin HTTP layer over `ExchangeService`: extracts the form field, runs the
//! flow, and maps the outcome onto a status code and JSON body. If the
//! client disconnects, hyper drops the handler future, which aborts the
//! in-flight token endpoint call before any encryption happens.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use token_relay::{Error, ExchangeService, TokenSet};
use tracing::{error, info, instrument, warn};

use crate::metrics;

/// Shared state passed to the relay handlers via axum State extractor
#[derive(Clone)]
pub struct RelayState {
    pub exchange: Arc<ExchangeService>,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
}

/// `POST /swap` form body
#[derive(Debug, Default, Deserialize)]
pub struct SwapForm {
    pub code: Option<String>,
}

/// `POST /refresh` form body
#[derive(Default, Deserialize)]
pub struct RefreshForm {
    pub refresh_token: Option<String>,
}

/// Exchange an authorization code; `form` is `None` when the body was not
/// a readable form.
#[instrument(skip_all, fields(request_id = %request_id, route = "/swap"))]
pub async fn swap(state: &RelayState, form: Option<SwapForm>, request_id: String) -> Response {
    let started = Instant::now();
    state.requests_total.fetch_add(1, Ordering::Relaxed);

    let code = form.as_ref().and_then(|f| f.code.as_deref());
    let outcome = state.exchange.swap(code).await;
    finish(state, "/swap", outcome, started, &request_id)
}

/// Refresh an access token from an encrypted refresh token.
#[instrument(skip_all, fields(request_id = %request_id, route = "/refresh"))]
pub async fn refresh(
    state: &RelayState,
    form: Option<RefreshForm>,
    request_id: String,
) -> Response {
    let started = Instant::now();
    state.requests_total.fetch_add(1, Ordering::Relaxed);

    let encrypted = form.as_ref().and_then(|f| f.refresh_token.as_deref());
    let outcome = state.exchange.refresh(encrypted).await;
    finish(state, "/refresh", outcome, started, &request_id)
}

fn finish(
    state: &RelayState,
    route: &'static str,
    outcome: token_relay::Result<TokenSet>,
    started: Instant,
    request_id: &str,
) -> Response {
    let mut response = match outcome {
        Ok(tokens) => json_response(StatusCode::OK, &Value::from(tokens)),
        Err(e) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            metrics::record_exchange_error(e.kind());
            log_failure(&e);
            error_response(&e)
        }
    };

    metrics::record_request(
        route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

fn log_failure(e: &Error) {
    if e.is_caller_fault() {
        info!(error = %e, kind = e.kind(), "rejected caller input");
        return;
    }
    match e {
        Error::AuthServer { status, .. } => {
            warn!(status, "authorization server rejected exchange")
        }
        Error::Network { timed_out, .. } => {
            warn!(error = %e, timed_out, "token endpoint call failed")
        }
        // Not caller-recoverable: the authorization server changed its contract
        Error::Parse(_) => error!(error = %e, "token endpoint integration broken"),
        Error::Config(_) => error!(error = %e, "relay misconfigured"),
        Error::Validation(_) | Error::Decryption(_) => {}
    }
}

/// Status code for each error kind.
pub fn status_for(e: &Error) -> StatusCode {
    if e.is_caller_fault() {
        return StatusCode::BAD_REQUEST;
    }
    match e {
        Error::Network {
            timed_out: true, ..
        } => StatusCode::GATEWAY_TIMEOUT,
        Error::Network { .. } | Error::Parse(_) => StatusCode::BAD_GATEWAY,
        Error::AuthServer { status, .. } => StatusCode::from_u16(*status)
            .ok()
            .filter(|s| s.is_client_error() || s.is_server_error())
            .unwrap_or(StatusCode::BAD_GATEWAY),
        Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        Error::Validation(_) | Error::Decryption(_) => StatusCode::BAD_REQUEST,
    }
}

/// Error body: the authorization server's own payload for `AuthServer`,
/// `{"error": message}` otherwise.
fn error_response(e: &Error) -> Response {
    let body = match e {
        Error::AuthServer {
            body: Value::Object(fields),
            ..
        } => Value::Object(fields.clone()),
        Error::AuthServer { body, .. } => json!({ "error": body }),
        other => json!({ "error": other.to_string() }),
    };
    json_response(status_for(e), &body)
}

fn json_response(status: StatusCode, body: &Value) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}
