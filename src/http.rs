// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! HTTP Servers
//!
//! Two routers:
//! - the signed API (`/api/...`, `/health`), public
//! - metrics (`/metrics`), bound to localhost and optionally bearer-protected
//!
//! API handlers read the raw body and the `X-Signature` header and hand both
//! to the services untouched. Every refusal looks the same to the caller.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, MatchedPath, State},
    http::{header, HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::debug;

use crate::envelope::{decode_signature_header, SIGNATURE_HEADER};
use crate::error::{AuthError, StoreError};
use crate::metrics::HubMetrics;
use crate::rate_limit::RouteLimits;
use crate::services::{AccountService, ContactService};

pub const REGISTER_ROUTE: &str = "/api/account/register";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub accounts: Arc<AccountService>,
    pub contacts: Arc<ContactService>,
    pub limits: Arc<RouteLimits>,
    pub metrics: HubMetrics,
}

/// Creates the signed API router.
pub fn create_api_router(state: ApiState, max_body_bytes: usize) -> Router {
    Router::new()
        .route(REGISTER_ROUTE, post(register))
        .route("/api/account/update-profile", post(update_profile))
        .route("/api/contact/find", post(find_contact))
        .route("/api/contact/add", post(add_contact))
        .route("/api/contact/confirm", post(confirm_contact))
        .route("/api/message/send", post(send_message))
        .route("/health", get(health_handler))
        // Route layer: unmatched paths 404 without touching the limiter
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Per-route, per-address token buckets keyed by the matched route
/// template. `/health` is exempt.
async fn rate_limit_middleware(
    State(state): State<ApiState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string());
    if let Some(route) = route.filter(|r| r != "/health") {
        let client = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        if !state.limits.consume(&route, &client) {
            state.metrics.rate_limited.inc();
            return (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response();
        }
    }
    next.run(request).await
}

fn signature_from(headers: &HeaderMap) -> Result<Vec<u8>, AuthError> {
    let value = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    decode_signature_header(value)
}

fn respond<T: Serialize>(metrics: &HubMetrics, result: Result<T, AuthError>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            debug!("Request rejected: {}", e);
            metrics
                .requests_rejected
                .with_label_values(&[e.reason()])
                .inc();
            match e {
                AuthError::Storage(StoreError::Sqlite(_)) | AuthError::Storage(StoreError::Corrupt(_)) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
                }
                _ => (StatusCode::BAD_REQUEST, "Rejected").into_response(),
            }
        }
    }
}

macro_rules! signed_handler {
    ($name:ident, $service:ident, $method:ident) => {
        async fn $name(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Response {
            let result = match signature_from(&headers) {
                Ok(signature) => state.$service.$method(&body, &signature).await,
                Err(e) => Err(e),
            };
            respond(&state.metrics, result)
        }
    };
}

signed_handler!(register, accounts, register);
signed_handler!(update_profile, accounts, update_profile);
signed_handler!(find_contact, contacts, find);
signed_handler!(add_contact, contacts, add);
signed_handler!(confirm_contact, contacts, confirm);
signed_handler!(send_message, contacts, send_message);

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============================================================================
// Metrics
// ============================================================================

/// Shared state for the metrics router.
#[derive(Clone)]
pub struct MetricsState {
    pub metrics: HubMetrics,
    pub metrics_token: Option<String>,
}

/// Checks the bearer token on `/metrics` when one is configured.
async fn metrics_auth_middleware(
    State(state): State<MetricsState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/metrics" {
        if let Some(ref expected_token) = state.metrics_token {
            let is_authorized = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .is_some_and(|token| token == expected_token);

            if !is_authorized {
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    "Unauthorized",
                )
                    .into_response();
            }
        }
    }

    next.run(request).await
}

/// Creates the metrics router.
pub fn create_metrics_router(state: MetricsState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/", get(root_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_auth_middleware,
        ))
        .with_state(state)
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "arqanum-hub-metrics",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/metrics"]
    }))
}

async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}
