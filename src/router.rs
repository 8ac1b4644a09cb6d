// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Delivery Router
//!
//! Store-and-forward: a message is pushed to the recipient's single live
//! connection if one is registered, otherwise it is written to the pending
//! queue. Never both, never dropped.

use std::sync::Arc;

use tracing::debug;

use crate::error::StoreError;
use crate::metrics::HubMetrics;
use crate::pending::{MessageKind, PendingMessage, PendingQueue};
use crate::presence::PresenceRegistry;

/// A message on its way to a recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
    pub kind: MessageKind,
    pub payload: Vec<u8>,
    pub payload_signature: Vec<u8>,
}

impl Delivery {
    /// A fresh delivery with a new message id.
    pub fn live(kind: MessageKind, payload: Vec<u8>, payload_signature: Vec<u8>) -> Self {
        Delivery {
            message_id: uuid::Uuid::new_v4().to_string(),
            kind,
            payload,
            payload_signature,
        }
    }
}

impl From<&PendingMessage> for Delivery {
    fn from(message: &PendingMessage) -> Self {
        Delivery {
            message_id: message.id.clone(),
            kind: message.kind,
            payload: message.payload.clone(),
            payload_signature: message.payload_signature.clone(),
        }
    }
}

/// Pushes a delivery to a specific connection.
pub trait OutboundChannel: Send + Sync {
    /// Returns true if the frame was handed to the connection.
    fn push_to_connection(&self, connection_id: &str, delivery: &Delivery) -> bool;

    /// Pushes a replayed pending row. With `settle_on_write` the connection
    /// acknowledges the row only after the frame reached its socket.
    fn push_pending(
        &self,
        connection_id: &str,
        delivery: &Delivery,
        settle_on_write: bool,
    ) -> bool {
        let _ = settle_on_write;
        self.push_to_connection(connection_id, delivery)
    }
}

/// Result of `deliver_or_enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Pushed to a live connection.
    Delivered,
    /// Stored in the pending queue.
    Queued,
}

pub struct DeliveryRouter {
    presence: PresenceRegistry,
    channel: Arc<dyn OutboundChannel>,
    queue: Arc<dyn PendingQueue>,
    metrics: HubMetrics,
}

impl DeliveryRouter {
    pub fn new(
        presence: PresenceRegistry,
        channel: Arc<dyn OutboundChannel>,
        queue: Arc<dyn PendingQueue>,
        metrics: HubMetrics,
    ) -> Self {
        DeliveryRouter {
            presence,
            channel,
            queue,
            metrics,
        }
    }

    /// Attempts live delivery to the recipient's first registered connection.
    pub async fn send(&self, delivery: &Delivery, recipient_id: &str) -> bool {
        let connections = self.presence.connections_for(recipient_id).await;
        match connections.first() {
            Some(connection_id) => self.send_to_connection(connection_id, delivery),
            None => false,
        }
    }

    /// Pushes to a known connection, bypassing the presence lookup.
    pub fn send_to_connection(&self, connection_id: &str, delivery: &Delivery) -> bool {
        self.channel.push_to_connection(connection_id, delivery)
    }

    /// Pushes a pending row to a known connection. See
    /// [`OutboundChannel::push_pending`].
    pub fn replay_to_connection(
        &self,
        connection_id: &str,
        delivery: &Delivery,
        settle_on_write: bool,
    ) -> bool {
        self.channel.push_pending(connection_id, delivery, settle_on_write)
    }

    /// Delivers live or falls back to the pending queue. Only a failure to
    /// persist the fallback row is an error.
    pub async fn deliver_or_enqueue(
        &self,
        kind: MessageKind,
        payload: Vec<u8>,
        payload_signature: Vec<u8>,
        recipient_id: &str,
    ) -> Result<DeliveryOutcome, StoreError> {
        let delivery = Delivery::live(kind, payload, payload_signature);
        if self.send(&delivery, recipient_id).await {
            self.metrics.deliveries_live.inc();
            return Ok(DeliveryOutcome::Delivered);
        }

        debug!("Recipient unreachable, queueing {}", delivery.message_id);
        let message = PendingMessage {
            id: delivery.message_id,
            recipient_id: recipient_id.to_string(),
            kind: delivery.kind,
            payload: delivery.payload,
            payload_signature: delivery.payload_signature,
            created_at_secs: crate::freshness::unix_now(),
        };
        self.queue.enqueue(message)?;
        self.metrics.deliveries_queued.inc();
        self.metrics.pending_messages.inc();
        Ok(DeliveryOutcome::Queued)
    }
}
