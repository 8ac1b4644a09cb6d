// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Prometheus Metrics for the Arqanum Hub

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Hub metrics.
#[derive(Clone)]
pub struct HubMetrics {
    /// Registry for all metrics.
    pub registry: Arc<Registry>,

    // Connection metrics
    /// Total WebSocket upgrades accepted.
    pub connections_total: IntCounter,
    /// Currently authenticated connections on this instance.
    pub connections_active: IntGauge,
    /// Handshakes refused, by reason.
    pub handshake_rejected: IntCounterVec,
    /// Connections closed because a newer handshake superseded them.
    pub connections_superseded: IntCounter,

    // Delivery metrics
    /// Messages pushed to a live connection.
    pub deliveries_live: IntCounter,
    /// Messages written to the pending queue.
    pub deliveries_queued: IntCounter,
    /// Pending messages pushed during replay.
    pub messages_replayed: IntCounter,
    /// Pending messages removed by acknowledgment.
    pub messages_acknowledged: IntCounter,
    /// Current number of pending messages.
    pub pending_messages: IntGauge,
    /// Pending messages expired by cleanup.
    pub pending_expired: IntCounter,

    // API
    /// Signed requests refused, by reason.
    pub requests_rejected: IntCounterVec,
    /// Requests rate limited.
    pub rate_limited: IntCounter,
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help)).unwrap()
}

fn gauge(name: &str, help: &str) -> IntGauge {
    IntGauge::with_opts(Opts::new(name, help)).unwrap()
}

fn by_reason(name: &str, help: &str) -> IntCounterVec {
    IntCounterVec::new(Opts::new(name, help), &["reason"]).unwrap()
}

impl HubMetrics {
    /// Creates a new metrics instance with all collectors registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_total = counter(
            "hub_connections_total",
            "Total WebSocket connections accepted",
        );
        let connections_active = gauge(
            "hub_connections_active",
            "Current authenticated WebSocket connections",
        );
        let handshake_rejected = by_reason(
            "hub_handshake_rejected_total",
            "Handshakes rejected, by reason",
        );
        let connections_superseded = counter(
            "hub_connections_superseded_total",
            "Connections closed by a newer handshake for the same account",
        );
        let deliveries_live = counter(
            "hub_deliveries_live_total",
            "Messages pushed to a live connection",
        );
        let deliveries_queued = counter(
            "hub_deliveries_queued_total",
            "Messages stored for later delivery",
        );
        let messages_replayed = counter(
            "hub_messages_replayed_total",
            "Pending messages pushed on reconnect",
        );
        let messages_acknowledged = counter(
            "hub_messages_acknowledged_total",
            "Pending messages removed after acknowledgment",
        );
        let pending_messages = gauge("hub_pending_messages", "Current number of pending messages");
        let pending_expired = counter(
            "hub_pending_expired_total",
            "Pending messages expired and cleaned up",
        );
        let requests_rejected = by_reason(
            "hub_requests_rejected_total",
            "Signed API requests rejected, by reason",
        );
        let rate_limited = counter("hub_rate_limited_total", "Total requests rate limited");

        registry
            .register(Box::new(connections_total.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_active.clone()))
            .unwrap();
        registry
            .register(Box::new(handshake_rejected.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_superseded.clone()))
            .unwrap();
        registry
            .register(Box::new(deliveries_live.clone()))
            .unwrap();
        registry
            .register(Box::new(deliveries_queued.clone()))
            .unwrap();
        registry
            .register(Box::new(messages_replayed.clone()))
            .unwrap();
        registry
            .register(Box::new(messages_acknowledged.clone()))
            .unwrap();
        registry
            .register(Box::new(pending_messages.clone()))
            .unwrap();
        registry
            .register(Box::new(pending_expired.clone()))
            .unwrap();
        registry
            .register(Box::new(requests_rejected.clone()))
            .unwrap();
        registry.register(Box::new(rate_limited.clone())).unwrap();

        HubMetrics {
            registry: Arc::new(registry),
            connections_total,
            connections_active,
            handshake_rejected,
            connections_superseded,
            deliveries_live,
            deliveries_queued,
            messages_replayed,
            messages_acknowledged,
            pending_messages,
            pending_expired,
            requests_rejected,
            rate_limited,
        }
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for HubMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_labelled_rejections() {
        let metrics = HubMetrics::new();
        metrics
            .handshake_rejected
            .with_label_values(&["signature"])
            .inc();
        metrics.deliveries_queued.inc();

        let text = metrics.encode();
        assert!(text.contains("hub_handshake_rejected_total{reason=\"signature\"} 1"));
        assert!(text.contains("hub_deliveries_queued_total 1"));
    }

    #[test]
    fn test_clones_share_collectors() {
        let metrics = HubMetrics::new();
        let clone = metrics.clone();
        clone.rate_limited.inc();
        assert_eq!(metrics.rate_limited.get(), 1);
    }
}
