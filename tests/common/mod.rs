// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common test utilities for hub integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::StreamExt;
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use arqanum_hub::accounts::{AccountDirectory, Identity};
use arqanum_hub::config::HubConfig;
use arqanum_hub::envelope::{build_token, AuthEnvelope};
use arqanum_hub::freshness::unix_now;
use arqanum_hub::handler;
use arqanum_hub::hub::Hub;
use arqanum_hub::pending::StorageBackend;
use arqanum_hub::protocol::{self, HubEnvelope};
use arqanum_hub::signature::SignatureScheme;

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A running hub bound to ephemeral localhost ports.
pub struct TestHub {
    pub hub: Hub,
    pub ws_url: String,
    pub api_url: String,
}

/// In-memory, Ed25519, difficulty-1 configuration.
#[allow(dead_code)]
pub fn test_config() -> HubConfig {
    HubConfig {
        storage_backend: StorageBackend::Memory,
        signature_scheme: SignatureScheme::Ed25519,
        pow_difficulty: 1,
        idle_timeout_secs: 5,
        ..HubConfig::default()
    }
}

/// Starts the WebSocket and API servers for `config`.
#[allow(dead_code)]
pub async fn start_hub(config: HubConfig) -> TestHub {
    let hub = Hub::build(config).await.expect("Failed to build hub");

    let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_addr = ws_listener.local_addr().unwrap();
    let deps = hub.connection_deps();
    tokio::spawn(async move {
        handler::serve(ws_listener, deps, 100).await;
    });

    let api_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let api_addr = api_listener.local_addr().unwrap();
    let api_router = hub.api_router();
    tokio::spawn(async move {
        axum::serve(
            api_listener,
            api_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestHub {
        hub,
        ws_url: format!("ws://{}", ws_addr),
        api_url: format!("http://{}", api_addr),
    }
}

/// A client identity holding an Ed25519 key.
#[allow(dead_code)]
pub struct TestAccount {
    pub account_id: String,
    pub key: Ed25519KeyPair,
}

#[allow(dead_code)]
impl TestAccount {
    pub fn generate(account_id: &str) -> Self {
        let rng = ring::rand::SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        TestAccount {
            account_id: account_id.to_string(),
            key: Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap(),
        }
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.key.public_key().as_ref().to_vec()
    }

    /// Inserts the account straight into the hub's directory.
    pub fn enroll(&self, hub: &TestHub) {
        assert!(hub
            .hub
            .directory
            .create(Identity::new(self.account_id.clone(), self.public_key()))
            .unwrap());
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key.sign(message).as_ref().to_vec()
    }

    /// `Authorization` value for a handshake at `timestamp`.
    pub fn bearer_at(&self, timestamp: i64) -> String {
        let raw = AuthEnvelope {
            account_id: self.account_id.clone(),
            timestamp,
            nonce: uuid::Uuid::new_v4().as_bytes().to_vec(),
        }
        .encode()
        .unwrap();
        format!("Bearer {}", build_token(&raw, &self.sign(&raw)))
    }

    pub fn bearer(&self) -> String {
        self.bearer_at(unix_now())
    }

    /// Encodes `request` and returns the body with its signature.
    pub fn signed_body<T: Serialize>(&self, request: &T) -> (Vec<u8>, Vec<u8>) {
        let body = rmp_serde::to_vec(request).unwrap();
        let signature = self.sign(&body);
        (body, signature)
    }
}

/// Opens a WebSocket with the given `Authorization` header.
#[allow(dead_code)]
pub async fn connect_with(url: &str, authorization: Option<&str>) -> WsClient {
    let mut request = url.into_client_request().unwrap();
    if let Some(value) = authorization {
        request
            .headers_mut()
            .insert("Authorization", value.parse().unwrap());
    }
    let (ws, _) = connect_async(request).await.expect("WebSocket connect failed");
    ws
}

/// Reads the next binary frame, skipping control frames.
#[allow(dead_code)]
pub async fn next_envelope(ws: &mut WsClient) -> Option<HubEnvelope> {
    loop {
        match timeout(Duration::from_secs(3), ws.next()).await {
            Ok(Some(Ok(Message::Binary(data)))) => {
                return Some(protocol::decode_message(&data).expect("undecodable frame"))
            }
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

/// Waits until the server closes the socket.
#[allow(dead_code)]
pub async fn expect_closed(ws: &mut WsClient) -> bool {
    loop {
        match timeout(Duration::from_secs(3), ws.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => return true,
            Ok(Some(Ok(_))) => continue,
            Err(_) => return false,
        }
    }
}
