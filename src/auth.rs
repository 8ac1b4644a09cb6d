// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Authenticator
//!
//! Runs the realtime handshake before any frame is exchanged:
//!
//! ```text
//! AwaitingToken → TokenParsed → TimestampChecked → IdentityResolved
//!   → SignatureVerified → PresenceRegistered → Authenticated
//! ```
//!
//! Any failed step ends in `Rejected`. There is no retry inside one attempt;
//! the client has to open a new connection. On success the pending backlog
//! is replayed in the background, the handshake does not wait for it.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::accounts::AccountDirectory;
use crate::envelope::{parse_bearer, split_token, AuthEnvelope};
use crate::error::AuthError;
use crate::freshness::FreshnessGuard;
use crate::metrics::HubMetrics;
use crate::presence::PresenceRegistry;
use crate::replay::PendingReplay;
use crate::signature::{verify_off_thread, SignatureVerifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingToken,
    TokenParsed,
    TimestampChecked,
    IdentityResolved,
    SignatureVerified,
    PresenceRegistered,
    Authenticated,
    Rejected,
}

/// A connection that passed the handshake.
#[derive(Debug, Clone)]
pub struct AuthenticatedConnection {
    pub account_id: String,
    pub connection_id: String,
    /// Prior connections of the same account that this one superseded.
    pub superseded: Vec<String>,
}

/// A refused handshake.
#[derive(Debug)]
pub struct HandshakeRejected {
    pub error: AuthError,
    /// Prior connections already evicted from presence before the refusal.
    /// They are gone from the registry and must still be closed locally.
    pub superseded: Vec<String>,
}

impl From<AuthError> for HandshakeRejected {
    fn from(error: AuthError) -> Self {
        HandshakeRejected {
            error,
            superseded: Vec::new(),
        }
    }
}

/// Tracks the handshake's progress for logging.
struct Progress<'a> {
    session: &'a str,
    state: HandshakeState,
}

impl Progress<'_> {
    fn advance(&mut self, next: HandshakeState) {
        debug!("[{}] Handshake {:?} -> {:?}", self.session, self.state, next);
        self.state = next;
    }
}

pub struct ConnectionAuthenticator {
    freshness: FreshnessGuard,
    verifier: Arc<dyn SignatureVerifier>,
    directory: Arc<dyn AccountDirectory>,
    presence: PresenceRegistry,
    replay: Arc<PendingReplay>,
    metrics: HubMetrics,
}

impl ConnectionAuthenticator {
    pub fn new(
        freshness: FreshnessGuard,
        verifier: Arc<dyn SignatureVerifier>,
        directory: Arc<dyn AccountDirectory>,
        presence: PresenceRegistry,
        replay: Arc<PendingReplay>,
        metrics: HubMetrics,
    ) -> Self {
        ConnectionAuthenticator {
            freshness,
            verifier,
            directory,
            presence,
            replay,
            metrics,
        }
    }

    /// Authenticates `connection_id` from its `Authorization` header value.
    ///
    /// `session` is only a log label.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        connection_id: &str,
        session: &str,
    ) -> Result<AuthenticatedConnection, HandshakeRejected> {
        let mut progress = Progress {
            session,
            state: HandshakeState::AwaitingToken,
        };

        match self.run(authorization, connection_id, &mut progress).await {
            Ok(connection) => {
                progress.advance(HandshakeState::Authenticated);
                self.spawn_replay(&connection, session);
                Ok(connection)
            }
            Err(rejection) => {
                warn!(
                    "[{}] Handshake rejected after {:?}: {}",
                    session, progress.state, rejection.error
                );
                progress.advance(HandshakeState::Rejected);
                self.metrics
                    .handshake_rejected
                    .with_label_values(&[rejection.error.reason()])
                    .inc();
                Err(rejection)
            }
        }
    }

    async fn run(
        &self,
        authorization: Option<&str>,
        connection_id: &str,
        progress: &mut Progress<'_>,
    ) -> Result<AuthenticatedConnection, HandshakeRejected> {
        let token = parse_bearer(authorization)?;
        let (raw_auth, signature) = split_token(token)?;
        let envelope = AuthEnvelope::decode(&raw_auth)?;
        progress.advance(HandshakeState::TokenParsed);

        if !self.freshness.is_valid(envelope.timestamp) {
            return Err(AuthError::StaleTimestamp.into());
        }
        progress.advance(HandshakeState::TimestampChecked);

        let public_key = self
            .directory
            .lookup_public_key(&envelope.account_id)
            .map_err(AuthError::from)?
            .ok_or(AuthError::UnknownAccount)?;
        progress.advance(HandshakeState::IdentityResolved);

        // Over the bytes as received, not a re-encoding of `envelope`
        if !verify_off_thread(self.verifier.clone(), public_key, raw_auth, signature).await {
            return Err(AuthError::SignatureMismatch.into());
        }
        progress.advance(HandshakeState::SignatureVerified);

        let superseded = self
            .presence
            .evict_all(&envelope.account_id)
            .await
            .ok_or(AuthError::RegistryUnavailable)?;
        if !self
            .presence
            .register(&envelope.account_id, connection_id)
            .await
        {
            return Err(HandshakeRejected {
                error: AuthError::RegistryUnavailable,
                superseded,
            });
        }
        progress.advance(HandshakeState::PresenceRegistered);

        Ok(AuthenticatedConnection {
            account_id: envelope.account_id,
            connection_id: connection_id.to_string(),
            superseded,
        })
    }

    fn spawn_replay(&self, connection: &AuthenticatedConnection, session: &str) {
        let replay = self.replay.clone();
        let account_id = connection.account_id.clone();
        let connection_id = connection.connection_id.clone();
        let session = session.to_string();
        tokio::spawn(async move {
            if let Err(e) = replay.replay(&account_id, &connection_id).await {
                warn!("[{}] Pending replay failed: {}", session, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{Identity, MemoryAccountDirectory};
    use crate::envelope::build_token;
    use crate::freshness::unix_now;
    use crate::pending::{MemoryPendingQueue, MessageKind, PendingMessage, PendingQueue};
    use crate::presence::tests::{RegisterFailingPresenceStore, UnavailablePresenceStore};
    use crate::replay::ReplayPolicy;
    use crate::router::tests::RecordingChannel;
    use crate::router::DeliveryRouter;
    use crate::signature::Ed25519Verifier;
    use ring::signature::{Ed25519KeyPair, KeyPair};
    use std::time::Duration;

    struct Fixture {
        authenticator: ConnectionAuthenticator,
        presence: PresenceRegistry,
        queue: Arc<MemoryPendingQueue>,
        channel: Arc<RecordingChannel>,
        metrics: HubMetrics,
        key: Ed25519KeyPair,
    }

    fn fixture_with(presence: PresenceRegistry, reachable: &[&str]) -> Fixture {
        let rng = ring::rand::SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let key = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();

        let directory = Arc::new(MemoryAccountDirectory::new());
        directory
            .create(Identity::new(
                "alice".to_string(),
                key.public_key().as_ref().to_vec(),
            ))
            .unwrap();

        let metrics = HubMetrics::new();
        let queue = Arc::new(MemoryPendingQueue::new());
        let channel = Arc::new(RecordingChannel::reachable(reachable));
        let router = Arc::new(DeliveryRouter::new(
            presence.clone(),
            channel.clone(),
            queue.clone(),
            metrics.clone(),
        ));
        let replay = Arc::new(PendingReplay::new(
            router,
            queue.clone(),
            ReplayPolicy::Acknowledge,
            metrics.clone(),
        ));
        let authenticator = ConnectionAuthenticator::new(
            FreshnessGuard::default(),
            Arc::new(Ed25519Verifier),
            directory,
            presence.clone(),
            replay,
            metrics.clone(),
        );
        Fixture {
            authenticator,
            presence,
            queue,
            channel,
            metrics,
            key,
        }
    }

    fn fixture(reachable: &[&str]) -> Fixture {
        fixture_with(PresenceRegistry::in_memory(), reachable)
    }

    fn header_for(key: &Ed25519KeyPair, account: &str, timestamp: i64) -> String {
        let raw = AuthEnvelope {
            account_id: account.to_string(),
            timestamp,
            nonce: vec![7; 16],
        }
        .encode()
        .unwrap();
        let sig = key.sign(&raw);
        format!("Bearer {}", build_token(&raw, sig.as_ref()))
    }

    fn rejections(metrics: &HubMetrics, reason: &str) -> u64 {
        metrics.handshake_rejected.with_label_values(&[reason]).get()
    }

    #[tokio::test]
    async fn test_valid_handshake_registers_presence() {
        let f = fixture(&[]);
        let header = header_for(&f.key, "alice", unix_now());

        let conn = f
            .authenticator
            .authenticate(Some(&header), "c1", "test")
            .await
            .unwrap();

        assert_eq!(conn.account_id, "alice");
        assert!(conn.superseded.is_empty());
        assert_eq!(f.presence.connections_for("alice").await, vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn test_new_handshake_supersedes_previous() {
        let f = fixture(&[]);
        let header = header_for(&f.key, "alice", unix_now());
        f.authenticator
            .authenticate(Some(&header), "c1", "test")
            .await
            .unwrap();

        let second = f
            .authenticator
            .authenticate(Some(&header), "c2", "test")
            .await
            .unwrap();

        assert_eq!(second.superseded, vec!["c1".to_string()]);
        assert_eq!(f.presence.connections_for("alice").await, vec!["c2".to_string()]);
        assert!(f.presence.account_for("c1").await.is_none());
    }

    #[tokio::test]
    async fn test_missing_and_malformed_credentials() {
        let f = fixture(&[]);
        for header in [None, Some("Basic x"), Some("Bearer onlyone"), Some("Bearer YQ==|Yg==")] {
            let err = f
                .authenticator
                .authenticate(header, "c1", "test")
                .await
                .unwrap_err();
            assert!(matches!(err.error, AuthError::MalformedCredential(_)), "{:?}", header);
        }
        assert_eq!(rejections(&f.metrics, "malformed"), 4);
        assert!(f.presence.account_for("c1").await.is_none());
    }

    #[tokio::test]
    async fn test_stale_timestamp_rejected() {
        let f = fixture(&[]);
        let header = header_for(&f.key, "alice", unix_now() - 60);
        let err = f
            .authenticator
            .authenticate(Some(&header), "c1", "test")
            .await
            .unwrap_err();
        assert!(matches!(err.error, AuthError::StaleTimestamp));
    }

    #[tokio::test]
    async fn test_unknown_account_rejected() {
        let f = fixture(&[]);
        let header = header_for(&f.key, "mallory", unix_now());
        let err = f
            .authenticator
            .authenticate(Some(&header), "c1", "test")
            .await
            .unwrap_err();
        assert!(matches!(err.error, AuthError::UnknownAccount));
    }

    #[tokio::test]
    async fn test_foreign_signature_rejected() {
        let f = fixture(&[]);
        let rng = ring::rand::SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let impostor = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();

        let header = header_for(&impostor, "alice", unix_now());
        let err = f
            .authenticator
            .authenticate(Some(&header), "c1", "test")
            .await
            .unwrap_err();
        assert!(matches!(err.error, AuthError::SignatureMismatch));
        assert_eq!(rejections(&f.metrics, "signature"), 1);
        assert!(f.presence.connections_for("alice").await.is_empty());
    }

    #[tokio::test]
    async fn test_registry_failure_fails_closed() {
        let f = fixture_with(
            PresenceRegistry::new(Arc::new(UnavailablePresenceStore)),
            &[],
        );
        let header = header_for(&f.key, "alice", unix_now());
        let err = f
            .authenticator
            .authenticate(Some(&header), "c1", "test")
            .await
            .unwrap_err();
        assert!(matches!(err.error, AuthError::RegistryUnavailable));
    }

    #[tokio::test]
    async fn test_failed_registration_returns_evicted_connections() {
        let store = Arc::new(RegisterFailingPresenceStore::default());
        let presence = PresenceRegistry::new(store.clone());
        store.seed("alice", "c1").await;
        let f = fixture_with(presence, &[]);

        let header = header_for(&f.key, "alice", unix_now());
        let rejection = f
            .authenticator
            .authenticate(Some(&header), "c2", "test")
            .await
            .unwrap_err();

        assert!(matches!(rejection.error, AuthError::RegistryUnavailable));
        assert_eq!(rejection.superseded, vec!["c1".to_string()]);
        assert!(f.presence.connections_for("alice").await.is_empty());
        assert_eq!(rejections(&f.metrics, "registry"), 1);
    }

    #[tokio::test]
    async fn test_success_triggers_replay() {
        let f = fixture(&["c1"]);
        f.queue
            .enqueue(PendingMessage::new(
                "alice".to_string(),
                MessageKind::Contact,
                vec![1],
                vec![2],
            ))
            .unwrap();

        let header = header_for(&f.key, "alice", unix_now());
        f.authenticator
            .authenticate(Some(&header), "c1", "test")
            .await
            .unwrap();

        // Replay runs in the background
        for _ in 0..50 {
            if !f.channel.pushed_to("c1").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let pushed = f.channel.pushed_to("c1");
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].kind, MessageKind::Contact);
    }
}
