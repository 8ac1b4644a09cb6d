// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Connection Handler
//!
//! Accepts the upgrade, authenticates the `Authorization` header through the
//! [`ConnectionAuthenticator`], then multiplexes client frames with the
//! outbound channel held in the [`ConnectionRegistry`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::auth::ConnectionAuthenticator;
use crate::connection_registry::ConnectionRegistry;
use crate::metrics::HubMetrics;
use crate::pending::PendingQueue;
use crate::presence::PresenceRegistry;
use crate::protocol::{self, HubPayload};

/// Everything a connection needs, cloned per accepted socket.
#[derive(Clone)]
pub struct ConnectionDeps {
    pub authenticator: Arc<ConnectionAuthenticator>,
    pub registry: Arc<ConnectionRegistry>,
    pub presence: PresenceRegistry,
    pub queue: Arc<dyn PendingQueue>,
    pub metrics: HubMetrics,
    pub idle_timeout: Duration,
    pub max_message_size: usize,
    /// Announced in the handshake ack: replayed rows are acknowledged by the hub.
    pub acknowledge_on_replay: bool,
}

fn authorization_header(request: &Request) -> Option<String> {
    request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Completes the WebSocket upgrade and returns the `Authorization` header
/// the client sent with it.
pub async fn accept_connection(
    stream: TcpStream,
    max_message_size: usize,
) -> Result<(WebSocketStream<TcpStream>, Option<String>), tungstenite::Error> {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_size);
    config.max_frame_size = Some(max_message_size);

    let mut authorization = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        authorization = authorization_header(request);
        Ok(response)
    };
    let ws_stream = accept_hdr_async_with_config(stream, callback, Some(config)).await?;
    Ok((ws_stream, authorization))
}

fn close_frame(code: CloseCode, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

/// Runs one connection to completion.
pub async fn handle_connection(
    ws_stream: WebSocketStream<TcpStream>,
    authorization: Option<String>,
    deps: ConnectionDeps,
) {
    let ConnectionDeps {
        authenticator,
        registry,
        presence,
        queue,
        metrics,
        idle_timeout,
        acknowledge_on_replay,
        ..
    } = deps;
    // Log label only. Account ids never reach the logs.
    let session = &uuid::Uuid::new_v4().to_string()[..8];
    let connection_id = uuid::Uuid::new_v4().to_string();

    let (mut write, mut read) = ws_stream.split();

    // Attached before authenticating: replay starts as soon as presence is
    // registered and needs somewhere to push.
    let mut outbound = registry.attach(&connection_id);

    let handshake = timeout(
        idle_timeout,
        authenticator.authenticate(authorization.as_deref(), &connection_id, session),
    )
    .await;
    let connection = match handshake {
        Ok(Ok(connection)) => connection,
        Ok(Err(rejection)) => {
            close_superseded(&registry, &rejection.superseded, &metrics, session);
            registry.detach(&connection_id);
            let _ = write.send(close_frame(CloseCode::Policy, "unauthorized")).await;
            return;
        }
        Err(_) => {
            warn!("[{}] Handshake timeout", session);
            registry.detach(&connection_id);
            presence.remove(&connection_id).await;
            return;
        }
    };
    let account_id = connection.account_id;

    close_superseded(&registry, &connection.superseded, &metrics, session);

    metrics.connections_active.inc();

    let ack = protocol::create_handshake_ack(acknowledge_on_replay);
    match protocol::encode_message(&ack) {
        Ok(data) => {
            if write.send(Message::Binary(data)).await.is_err() {
                warn!("[{}] Failed to send handshake ack", session);
            }
        }
        Err(e) => error!("[{}] Failed to encode handshake ack: {}", session, e),
    }

    loop {
        tokio::select! {
            ws_msg = timeout(idle_timeout, read.next()) => {
                let msg = match ws_msg {
                    Ok(Some(Ok(msg))) => msg,
                    Ok(Some(Err(e))) => {
                        warn!("[{}] Connection error: {}", session, e);
                        break;
                    }
                    Ok(None) => {
                        debug!("[{}] Disconnected", session);
                        break;
                    }
                    Err(_) => {
                        warn!("[{}] Idle timeout", session);
                        break;
                    }
                };

                match msg {
                    Message::Binary(data) => {
                        handle_frame(&data, &account_id, queue.as_ref(), &metrics, session);
                    }
                    Message::Ping(data) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Message::Close(_) => {
                        debug!("[{}] Client sent close", session);
                        break;
                    }
                    _ => {}
                }
            }
            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        if write.send(Message::Binary(frame.data)).await.is_err() {
                            warn!("[{}] Failed to push frame", session);
                            break;
                        }
                        if let Some(message_id) = frame.acknowledge {
                            settle_pending(
                                queue.as_ref(),
                                &account_id,
                                &message_id,
                                &metrics,
                                session,
                            );
                        }
                    }
                    None => {
                        info!("[{}] Superseded by a newer connection", session);
                        let _ = write.send(close_frame(CloseCode::Policy, "superseded")).await;
                        break;
                    }
                }
            }
        }
    }

    registry.detach(&connection_id);
    presence.remove(&connection_id).await;
    metrics.connections_active.dec();
}

/// Shuts the locally hosted connections a handshake evicted from presence.
fn close_superseded(
    registry: &ConnectionRegistry,
    superseded: &[String],
    metrics: &HubMetrics,
    session: &str,
) {
    for previous in superseded {
        if registry.close(previous) {
            metrics.connections_superseded.inc();
        }
    }
    if !superseded.is_empty() {
        debug!(
            "[{}] Superseded {} prior connection(s)",
            session,
            superseded.len()
        );
    }
}

/// Handles one binary frame from an authenticated client.
fn handle_frame(
    data: &[u8],
    account_id: &str,
    queue: &dyn PendingQueue,
    metrics: &HubMetrics,
    session: &str,
) {
    let envelope = match protocol::decode_message(data) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("[{}] Failed to decode frame: {}", session, e);
            return;
        }
    };

    match envelope.payload {
        HubPayload::Acknowledgment(ack) => {
            settle_pending(queue, account_id, &ack.message_id, metrics, session);
        }
        HubPayload::HandshakeAck(_) | HubPayload::Delivery(_) => {
            debug!("[{}] Unexpected server-only frame", session);
        }
        HubPayload::Unknown => {
            debug!("[{}] Unknown frame type", session);
        }
    }
}

/// Removes a pending row of `account_id`, either on a client acknowledgment
/// or once a replayed frame has been written out.
fn settle_pending(
    queue: &dyn PendingQueue,
    account_id: &str,
    message_id: &str,
    metrics: &HubMetrics,
    session: &str,
) {
    match queue.acknowledge(account_id, message_id) {
        Ok(true) => {
            metrics.messages_acknowledged.inc();
            metrics.pending_messages.dec();
        }
        Ok(false) => debug!("[{}] Acknowledgment for unknown message", session),
        Err(e) => warn!("[{}] Failed to acknowledge: {}", session, e),
    }
}

/// Accepts WebSocket connections until the listener fails.
pub async fn serve(listener: TcpListener, deps: ConnectionDeps, max_connections: usize) {
    let slots = Arc::new(Semaphore::new(max_connections));

    while let Ok((stream, _addr)) = listener.accept().await {
        let permit = match slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Connection rejected: at max capacity ({})", max_connections);
                drop(stream);
                continue;
            }
        };

        let deps = deps.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let upgrade = timeout(
                deps.idle_timeout,
                accept_connection(stream, deps.max_message_size),
            )
            .await;
            match upgrade {
                Ok(Ok((ws_stream, authorization))) => {
                    deps.metrics.connections_total.inc();
                    handle_connection(ws_stream, authorization, deps).await;
                }
                Ok(Err(e)) => debug!("WebSocket upgrade failed: {}", e),
                Err(_) => warn!("WebSocket upgrade timeout"),
            }
        });
    }
}
