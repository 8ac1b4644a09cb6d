// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Pending delivery replay.
//!
//! After a handshake registers a connection, every queued message for the
//! account is pushed to that connection in queue order.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::StoreError;
use crate::metrics::HubMetrics;
use crate::pending::PendingQueue;
use crate::router::{Delivery, DeliveryRouter};

/// What happens to a row once it has been replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayPolicy {
    /// Remove each row once its frame has been written to the socket.
    #[default]
    Acknowledge,
    /// Keep rows; every reconnect redelivers the whole backlog until the
    /// client acknowledges each message explicitly.
    Redeliver,
}

impl ReplayPolicy {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "acknowledge" | "ack" => Some(ReplayPolicy::Acknowledge),
            "redeliver" => Some(ReplayPolicy::Redeliver),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Rows read from the queue.
    pub attempted: usize,
    /// Rows handed to the connection. Under `Acknowledge` the connection
    /// removes each one after writing it out.
    pub delivered: usize,
}

pub struct PendingReplay {
    router: Arc<DeliveryRouter>,
    queue: Arc<dyn PendingQueue>,
    policy: ReplayPolicy,
    metrics: HubMetrics,
}

impl PendingReplay {
    pub fn new(
        router: Arc<DeliveryRouter>,
        queue: Arc<dyn PendingQueue>,
        policy: ReplayPolicy,
        metrics: HubMetrics,
    ) -> Self {
        PendingReplay {
            router,
            queue,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> ReplayPolicy {
        self.policy
    }

    /// Replays the backlog of `account_id` onto `connection_id`.
    ///
    /// Stops at the first failed push: the remaining rows stay queued and
    /// keep their order for the next connection.
    pub async fn replay(
        &self,
        account_id: &str,
        connection_id: &str,
    ) -> Result<ReplayReport, StoreError> {
        let backlog = self.queue.drain(account_id)?;
        let mut report = ReplayReport {
            attempted: backlog.len(),
            ..ReplayReport::default()
        };

        let settle_on_write = self.policy == ReplayPolicy::Acknowledge;
        for message in &backlog {
            let delivery = Delivery::from(message);
            if !self
                .router
                .replay_to_connection(connection_id, &delivery, settle_on_write)
            {
                warn!(
                    "Replay interrupted after {} of {} messages",
                    report.delivered, report.attempted
                );
                break;
            }
            report.delivered += 1;
            self.metrics.messages_replayed.inc();
        }

        debug!(
            "Replayed {}/{} pending messages",
            report.delivered, report.attempted
        );
        Ok(report)
    }
}
