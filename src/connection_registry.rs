// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Registry
//!
//! Process-local table of the WebSocket connections this instance hosts,
//! keyed by connection id. It is the outbound half of live delivery: the
//! presence registry says *which* connection an account is on, this registry
//! owns the channel that reaches it.
//!
//! A connection id that lives on another instance is simply absent here, so
//! a push to it fails and the router falls back to the pending queue.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;
use tracing::warn;

use crate::protocol;
use crate::router::{Delivery, OutboundChannel};

/// Per-connection channel capacity.
const CHANNEL_CAPACITY: usize = 64;

/// An encoded binary frame queued for a connection.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub data: Vec<u8>,
    /// Pending row to acknowledge once `data` has been written to the socket.
    pub acknowledge: Option<String>,
}

impl OutboundFrame {
    pub fn new(data: Vec<u8>) -> Self {
        OutboundFrame {
            data,
            acknowledge: None,
        }
    }
}

/// Thread-safe registry of locally hosted connections.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, mpsc::Sender<OutboundFrame>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Attaches a connection and returns the receiving end of its channel.
    pub fn attach(&self, connection_id: &str) -> mpsc::Receiver<OutboundFrame> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut connections = self.connections.write().unwrap();
        connections.insert(connection_id.to_string(), tx);
        rx
    }

    /// Detaches a connection on disconnect.
    pub fn detach(&self, connection_id: &str) {
        let mut connections = self.connections.write().unwrap();
        connections.remove(connection_id);
    }

    /// Closes a connection's channel. Its receiver sees the channel end and
    /// the owning handler shuts the socket. Returns false if not hosted here.
    pub fn close(&self, connection_id: &str) -> bool {
        let mut connections = self.connections.write().unwrap();
        connections.remove(connection_id).is_some()
    }

    /// Queues a frame. Returns false if the connection is not hosted here or
    /// its channel is full.
    pub fn try_send(&self, connection_id: &str, frame: OutboundFrame) -> bool {
        let connections = self.connections.read().unwrap();
        match connections.get(connection_id) {
            Some(tx) => tx.try_send(frame).is_ok(),
            None => false,
        }
    }

    /// Returns the number of locally hosted connections.
    pub fn connected_count(&self) -> usize {
        let connections = self.connections.read().unwrap();
        connections.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_delivery(delivery: &Delivery) -> Option<Vec<u8>> {
    match protocol::encode_message(&protocol::create_delivery(delivery)) {
        Ok(data) => Some(data),
        Err(e) => {
            warn!("Failed to encode delivery: {}", e);
            None
        }
    }
}

impl OutboundChannel for ConnectionRegistry {
    fn push_to_connection(&self, connection_id: &str, delivery: &Delivery) -> bool {
        match encode_delivery(delivery) {
            Some(data) => self.try_send(connection_id, OutboundFrame::new(data)),
            None => false,
        }
    }

    fn push_pending(
        &self,
        connection_id: &str,
        delivery: &Delivery,
        settle_on_write: bool,
    ) -> bool {
        let Some(data) = encode_delivery(delivery) else {
            return false;
        };
        let frame = OutboundFrame {
            data,
            acknowledge: settle_on_write.then(|| delivery.message_id.clone()),
        };
        self.try_send(connection_id, frame)
    }
}
