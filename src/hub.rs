// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Hub assembly: builds the shared components from a [`HubConfig`] and
//! spawns the periodic maintenance tasks.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tracing::info;

use crate::accounts::{AccountDirectory, MemoryAccountDirectory, SqliteAccountDirectory};
use crate::auth::ConnectionAuthenticator;
use crate::captcha::{CaptchaVerifier, DisabledCaptcha, HCaptchaVerifier};
use crate::config::HubConfig;
use crate::connection_registry::ConnectionRegistry;
use crate::envelope::RequestGate;
use crate::error::StartupError;
use crate::freshness::FreshnessGuard;
use crate::handler::ConnectionDeps;
use crate::http::{self, ApiState, MetricsState, REGISTER_ROUTE};
use crate::metrics::HubMetrics;
use crate::pending::{MemoryPendingQueue, PendingQueue, SqlitePendingQueue, StorageBackend};
use crate::presence::{MemoryPresenceStore, PresenceBackend, PresenceRegistry, PresenceStore, RedisPresenceStore};
use crate::proof_of_work::ProofOfWorkGuard;
use crate::rate_limit::RouteLimits;
use crate::replay::{PendingReplay, ReplayPolicy};
use crate::router::DeliveryRouter;
use crate::services::{AccountService, ContactService};
use crate::signature::verifier_for;

/// Rate limiter sweep period and idle threshold.
const LIMITER_SWEEP: Duration = Duration::from_secs(600);
const LIMITER_IDLE: Duration = Duration::from_secs(1800);

pub struct Hub {
    pub config: Arc<HubConfig>,
    pub metrics: HubMetrics,
    pub directory: Arc<dyn AccountDirectory>,
    pub queue: Arc<dyn PendingQueue>,
    pub presence: PresenceRegistry,
    pub registry: Arc<ConnectionRegistry>,
    limits: Arc<RouteLimits>,
    connection_deps: ConnectionDeps,
    api_state: ApiState,
}

impl Hub {
    /// Opens the stores and wires every component.
    pub async fn build(config: HubConfig) -> Result<Self, StartupError> {
        let metrics = HubMetrics::new();

        let (directory, queue): (Arc<dyn AccountDirectory>, Arc<dyn PendingQueue>) =
            match config.storage_backend {
                StorageBackend::Memory => (
                    Arc::new(MemoryAccountDirectory::new()),
                    Arc::new(MemoryPendingQueue::new()),
                ),
                StorageBackend::Sqlite => {
                    std::fs::create_dir_all(&config.data_dir)?;
                    (
                        Arc::new(SqliteAccountDirectory::open(config.data_dir.join("accounts.db"))?),
                        Arc::new(SqlitePendingQueue::open(config.data_dir.join("pending.db"))?),
                    )
                }
            };
        metrics.pending_messages.set(queue.message_count() as i64);

        let store: Arc<dyn PresenceStore> = match config.presence_backend {
            PresenceBackend::Memory => Arc::new(MemoryPresenceStore::new()),
            PresenceBackend::Redis => Arc::new(RedisPresenceStore::connect(&config.redis_url).await?),
        };
        let presence = PresenceRegistry::new(store);

        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(DeliveryRouter::new(
            presence.clone(),
            registry.clone(),
            queue.clone(),
            metrics.clone(),
        ));
        let replay = Arc::new(PendingReplay::new(
            router.clone(),
            queue.clone(),
            config.replay_policy,
            metrics.clone(),
        ));

        let freshness = FreshnessGuard::new(config.max_skew_secs);
        let verifier = verifier_for(config.signature_scheme);
        let authenticator = Arc::new(ConnectionAuthenticator::new(
            freshness,
            verifier.clone(),
            directory.clone(),
            presence.clone(),
            replay.clone(),
            metrics.clone(),
        ));

        let captcha: Arc<dyn CaptchaVerifier> = match &config.captcha_secret {
            Some(secret) => Arc::new(HCaptchaVerifier::with_endpoint(
                reqwest::Client::new(),
                secret.clone(),
                config.captcha_endpoint.clone(),
            )),
            None => Arc::new(DisabledCaptcha),
        };

        let gate = Arc::new(RequestGate::new(freshness, verifier.clone(), directory.clone()));
        let limits = Arc::new(
            RouteLimits::new(config.api_rate_per_min)
                .with_route(REGISTER_ROUTE, config.register_rate_per_min),
        );
        let api_state = ApiState {
            accounts: Arc::new(AccountService::new(
                directory.clone(),
                freshness,
                verifier,
                ProofOfWorkGuard::new(config.pow_difficulty),
                captcha,
                gate.clone(),
            )),
            contacts: Arc::new(ContactService::new(directory.clone(), gate, router)),
            limits: limits.clone(),
            metrics: metrics.clone(),
        };

        let connection_deps = ConnectionDeps {
            authenticator,
            registry: registry.clone(),
            presence: presence.clone(),
            queue: queue.clone(),
            metrics: metrics.clone(),
            idle_timeout: config.idle_timeout(),
            max_message_size: config.max_message_size,
            acknowledge_on_replay: replay.policy() == ReplayPolicy::Acknowledge,
        };

        Ok(Hub {
            config: Arc::new(config),
            metrics,
            directory,
            queue,
            presence,
            registry,
            limits,
            connection_deps,
            api_state,
        })
    }

    pub fn connection_deps(&self) -> ConnectionDeps {
        self.connection_deps.clone()
    }

    pub fn api_router(&self) -> Router {
        http::create_api_router(self.api_state.clone(), self.config.max_message_size)
    }

    pub fn metrics_router(&self) -> Router {
        http::create_metrics_router(MetricsState {
            metrics: self.metrics.clone(),
            metrics_token: self.config.metrics_token.clone(),
        })
    }

    /// Spawns pending-message expiry and rate limiter sweeps.
    pub fn spawn_maintenance(&self) {
        let queue = self.queue.clone();
        let metrics = self.metrics.clone();
        let ttl = self.config.pending_ttl();
        let interval = self.config.cleanup_interval();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let removed = queue.cleanup_expired(ttl);
                if removed > 0 {
                    info!("Cleaned up {} expired pending messages", removed);
                    metrics.pending_expired.inc_by(removed as u64);
                }
                metrics.pending_messages.set(queue.message_count() as i64);
            }
        });

        let limits = self.limits.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(LIMITER_SWEEP).await;
                let removed = limits.cleanup_inactive(LIMITER_IDLE);
                if removed > 0 {
                    info!("Cleaned up {} stale rate limiter entries", removed);
                }
            }
        });
    }
}
