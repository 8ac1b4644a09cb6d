// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Arqanum Hub Server
//!
//! Identity and message hub for signed clients. Provides:
//! - WebSocket endpoint for authenticated realtime delivery
//! - Signed HTTP API for registration, profiles, contacts and messages
//! - Localhost metrics endpoint for Prometheus

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{error, info};

use arqanum_hub::config::HubConfig;
use arqanum_hub::handler;
use arqanum_hub::hub::Hub;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("arqanum_hub=info".parse().unwrap()),
        )
        .init();

    let config = HubConfig::from_env();

    // TLS enforcement: refuse to start if not localhost and TLS not confirmed
    let is_localhost =
        config.listen_addr.ip().is_loopback() && config.api_addr.ip().is_loopback();
    let tls_verified = std::env::var("HUB_TLS_VERIFIED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    if !is_localhost && !tls_verified {
        error!("=======================================================================");
        error!("SECURITY ERROR: Hub MUST run behind a TLS proxy in production!");
        error!("=======================================================================");
        error!("");
        error!(
            "The hub listens on non-localhost addresses ({}, {})",
            config.listen_addr, config.api_addr
        );
        error!("but TLS verification has not been confirmed.");
        error!("");
        error!("To fix this, either:");
        error!("  1. Run behind a TLS-terminating proxy and set HUB_TLS_VERIFIED=true");
        error!("  2. Bind to localhost for local development:");
        error!("     HUB_LISTEN_ADDR=127.0.0.1:8080 HUB_API_ADDR=127.0.0.1:8082");
        error!("=======================================================================");
        std::process::exit(1);
    }

    info!("Starting Arqanum Hub v{}", env!("CARGO_PKG_VERSION"));
    info!("WebSocket: {}", config.listen_addr);
    info!("API: {}", config.api_addr);
    info!("Metrics endpoint: {}", config.metrics_addr);
    info!("Signature scheme: {:?}", config.signature_scheme);
    info!("Storage backend: {:?}", config.storage_backend);
    info!("Presence backend: {:?}", config.presence_backend);
    info!("Replay policy: {:?}", config.replay_policy);
    if config.captcha_secret.is_none() {
        info!("WARNING: HUB_CAPTCHA_SECRET unset, registration captcha disabled");
    }
    if config.metrics_token.is_some() {
        info!("Metrics endpoint protected with bearer token");
    } else if !config.metrics_addr.ip().is_loopback() {
        info!("WARNING: Metrics exposed on non-localhost without auth token");
    }

    let hub = match Hub::build(config).await {
        Ok(hub) => hub,
        Err(e) => {
            error!("Failed to start hub: {}", e);
            std::process::exit(1);
        }
    };
    hub.spawn_maintenance();

    // Metrics server
    let metrics_listener = TcpListener::bind(hub.config.metrics_addr)
        .await
        .expect("Failed to bind metrics listener");
    let metrics_router = hub.metrics_router();
    tokio::spawn(async move {
        axum::serve(metrics_listener, metrics_router).await.unwrap();
    });

    // Signed API server. Client addresses feed the rate limiter.
    let api_listener = TcpListener::bind(hub.config.api_addr)
        .await
        .expect("Failed to bind API listener");
    let api_router = hub.api_router();
    tokio::spawn(async move {
        axum::serve(
            api_listener,
            api_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    let listener = TcpListener::bind(hub.config.listen_addr)
        .await
        .expect("Failed to bind WebSocket listener");
    info!("WebSocket server listening on {}", hub.config.listen_addr);

    handler::serve(listener, hub.connection_deps(), hub.config.max_connections).await;
}
