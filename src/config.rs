// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Hub Configuration
//!
//! Configuration loaded from `HUB_*` environment variables. Unset or
//! unparsable values keep their defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::freshness::DEFAULT_MAX_SKEW_SECS;
use crate::pending::StorageBackend;
use crate::presence::PresenceBackend;
use crate::proof_of_work::DEFAULT_DIFFICULTY;
use crate::replay::ReplayPolicy;
use crate::signature::SignatureScheme;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// WebSocket listen address.
    pub listen_addr: SocketAddr,
    /// Signed HTTP API listen address.
    pub api_addr: SocketAddr,
    /// Metrics listen address (localhost by default).
    pub metrics_addr: SocketAddr,
    /// Bearer token required on `/metrics`, if set.
    pub metrics_token: Option<String>,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Maximum WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Idle timeout in seconds.
    pub idle_timeout_secs: u64,
    /// Accepted clock skew for signed timestamps.
    pub max_skew_secs: i64,
    /// Leading '0' characters required in registration proofs.
    pub pow_difficulty: usize,
    pub signature_scheme: SignatureScheme,
    pub presence_backend: PresenceBackend,
    pub redis_url: String,
    pub storage_backend: StorageBackend,
    /// Data directory for SQLite files.
    pub data_dir: PathBuf,
    /// Pending message time-to-live in seconds.
    pub pending_ttl_secs: u64,
    /// Cleanup interval in seconds.
    pub cleanup_interval_secs: u64,
    pub replay_policy: ReplayPolicy,
    /// Registration requests per minute per client address.
    pub register_rate_per_min: u32,
    /// Requests per minute per client address on every other route.
    pub api_rate_per_min: u32,
    /// hCaptcha secret. Registration accepts any token when unset.
    pub captcha_secret: Option<String>,
    pub captcha_endpoint: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            api_addr: SocketAddr::from(([0, 0, 0, 0], 8082)),
            metrics_addr: SocketAddr::from(([127, 0, 0, 1], 8081)),
            metrics_token: None,
            max_connections: 1000,
            max_message_size: 1_048_576, // 1 MB
            idle_timeout_secs: 300,
            max_skew_secs: DEFAULT_MAX_SKEW_SECS,
            pow_difficulty: DEFAULT_DIFFICULTY,
            signature_scheme: SignatureScheme::default(),
            presence_backend: PresenceBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            storage_backend: StorageBackend::Sqlite,
            data_dir: PathBuf::from("./data"),
            pending_ttl_secs: 30 * 24 * 60 * 60, // 30 days
            cleanup_interval_secs: 3600,
            replay_policy: ReplayPolicy::default(),
            register_rate_per_min: 2,
            api_rate_per_min: 30,
            captcha_secret: None,
            captcha_endpoint: crate::captcha::HCAPTCHA_SITEVERIFY_URL.to_string(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str, target: &mut T) {
    if let Ok(val) = std::env::var(name) {
        if let Ok(parsed) = val.parse() {
            *target = parsed;
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl HubConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        env_parse("HUB_LISTEN_ADDR", &mut config.listen_addr);
        env_parse("HUB_API_ADDR", &mut config.api_addr);
        env_parse("HUB_METRICS_ADDR", &mut config.metrics_addr);
        config.metrics_token = env_nonempty("HUB_METRICS_TOKEN");
        env_parse("HUB_MAX_CONNECTIONS", &mut config.max_connections);
        env_parse("HUB_MAX_MESSAGE_SIZE", &mut config.max_message_size);
        env_parse("HUB_IDLE_TIMEOUT", &mut config.idle_timeout_secs);
        env_parse("HUB_MAX_SKEW_SECS", &mut config.max_skew_secs);
        env_parse("HUB_POW_DIFFICULTY", &mut config.pow_difficulty);

        if let Some(scheme) = env_nonempty("HUB_SIGNATURE_SCHEME")
            .as_deref()
            .and_then(SignatureScheme::parse)
        {
            config.signature_scheme = scheme;
        }

        if let Ok(val) = std::env::var("HUB_PRESENCE_BACKEND") {
            config.presence_backend = match val.to_lowercase().as_str() {
                "redis" => PresenceBackend::Redis,
                _ => PresenceBackend::Memory,
            };
        }
        if let Some(url) = env_nonempty("HUB_REDIS_URL") {
            config.redis_url = url;
        }

        if let Ok(val) = std::env::var("HUB_STORAGE_BACKEND") {
            config.storage_backend = match val.to_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                _ => StorageBackend::Sqlite,
            };
        }
        if let Ok(val) = std::env::var("HUB_DATA_DIR") {
            config.data_dir = PathBuf::from(val);
        }

        env_parse("HUB_PENDING_TTL_SECS", &mut config.pending_ttl_secs);
        env_parse("HUB_CLEANUP_INTERVAL", &mut config.cleanup_interval_secs);

        if let Some(policy) = env_nonempty("HUB_REPLAY_POLICY")
            .as_deref()
            .and_then(ReplayPolicy::parse)
        {
            config.replay_policy = policy;
        }

        env_parse("HUB_REGISTER_RATE_LIMIT", &mut config.register_rate_per_min);
        env_parse("HUB_API_RATE_LIMIT", &mut config.api_rate_per_min);

        config.captcha_secret = env_nonempty("HUB_CAPTCHA_SECRET");
        if let Some(endpoint) = env_nonempty("HUB_CAPTCHA_ENDPOINT") {
            config.captcha_endpoint = endpoint;
        }

        config
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}
