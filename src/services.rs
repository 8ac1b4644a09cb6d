// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Account and Contact Services
//!
//! Business mutations behind the signed API. Every request is a MessagePack
//! record (positional) signed as sent; nothing durable is touched until the
//! signature, timestamp and any registration checks have passed.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::accounts::{AccountDirectory, Identity};
use crate::captcha::CaptchaVerifier;
use crate::envelope::{RequestGate, SignedRequest};
use crate::error::AuthError;
use crate::freshness::{unix_now, FreshnessGuard};
use crate::pending::MessageKind;
use crate::proof_of_work::ProofOfWorkGuard;
use crate::router::{DeliveryOutcome, DeliveryRouter};
use crate::signature::{verify_off_thread, SignatureVerifier};

// ============================================================================
// Request records
// ============================================================================

/// Self-signed registration. The signature is checked against the key it
/// carries, the proof of work binds `account_id` to that key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub account_id: String,
    #[serde(with = "serde_bytes")]
    pub signature_public_key: Vec<u8>,
    pub proof_of_work: String,
    pub proof_of_work_nonce: String,
    pub captcha_token: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    pub account_id: String,
    #[serde(with = "serde_bytes")]
    pub profile: Vec<u8>,
    /// When set, the update only applies on this exact version.
    pub expected_version: Option<i64>,
    pub timestamp: i64,
}

/// Contact request, contact confirmation or message, addressed to one
/// recipient. `payload` is opaque and signed end to end by the sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardRequest {
    pub account_id: String,
    pub recipient_id: String,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub payload_signature: Vec<u8>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindContactRequest {
    pub account_id: String,
    pub contact_id: String,
    pub timestamp: i64,
}

macro_rules! signed_request {
    ($($ty:ty),*) => {
        $(impl SignedRequest for $ty {
            fn account_id(&self) -> &str {
                &self.account_id
            }
            fn timestamp(&self) -> i64 {
                self.timestamp
            }
        })*
    };
}

signed_request!(UpdateProfileRequest, ForwardRequest, FindContactRequest);

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterResponse {
    pub account_id: String,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionResponse {
    pub version: i64,
    pub timestamp: i64,
}

/// Returned for every accepted forward, whether it was delivered live or
/// queued. The sender cannot tell the two apart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcceptedResponse {
    pub accepted: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactCard {
    pub account_id: String,
    /// Base64.
    pub public_key: String,
    /// Base64.
    pub profile: String,
    pub version: i64,
}

// ============================================================================
// Account service
// ============================================================================

pub struct AccountService {
    directory: Arc<dyn AccountDirectory>,
    freshness: FreshnessGuard,
    verifier: Arc<dyn SignatureVerifier>,
    proof_of_work: ProofOfWorkGuard,
    captcha: Arc<dyn CaptchaVerifier>,
    gate: Arc<RequestGate>,
}

impl AccountService {
    pub fn new(
        directory: Arc<dyn AccountDirectory>,
        freshness: FreshnessGuard,
        verifier: Arc<dyn SignatureVerifier>,
        proof_of_work: ProofOfWorkGuard,
        captcha: Arc<dyn CaptchaVerifier>,
        gate: Arc<RequestGate>,
    ) -> Self {
        AccountService {
            directory,
            freshness,
            verifier,
            proof_of_work,
            captcha,
            gate,
        }
    }

    pub async fn register(&self, body: &[u8], signature: &[u8]) -> Result<RegisterResponse, AuthError> {
        let request: RegisterRequest = rmp_serde::from_slice(body)
            .map_err(|_| AuthError::MalformedCredential("register body"))?;

        if !self.freshness.is_valid(request.timestamp) {
            return Err(AuthError::StaleTimestamp);
        }
        if !self.captcha.verify(&request.captcha_token).await {
            return Err(AuthError::CaptchaFailed);
        }
        if self.directory.lookup_public_key(&request.account_id)?.is_some() {
            return Err(AuthError::AccountExists);
        }

        let verified = verify_off_thread(
            self.verifier.clone(),
            request.signature_public_key.clone(),
            body.to_vec(),
            signature.to_vec(),
        )
        .await;
        if !verified {
            return Err(AuthError::SignatureMismatch);
        }

        let public_key_b64 = STANDARD.encode(&request.signature_public_key);
        if !self.proof_of_work.check_proof(
            &request.account_id,
            &request.proof_of_work,
            &request.proof_of_work_nonce,
            &public_key_b64,
        ) {
            return Err(AuthError::ProofOfWorkFailed);
        }

        let identity = Identity::new(request.account_id, request.signature_public_key);
        let response = RegisterResponse {
            account_id: identity.account_id.clone(),
            version: identity.version,
        };
        // Lost a race with a concurrent registration of the same key
        if !self.directory.create(identity)? {
            return Err(AuthError::AccountExists);
        }
        info!("Account registered");
        Ok(response)
    }

    pub async fn update_profile(&self, body: &[u8], signature: &[u8]) -> Result<VersionResponse, AuthError> {
        let request: UpdateProfileRequest = self.gate.admit(body, signature).await?;
        let version = self.directory.update_profile(
            &request.account_id,
            &request.profile,
            request.expected_version,
        )?;
        Ok(VersionResponse {
            version,
            timestamp: unix_now(),
        })
    }
}

// ============================================================================
// Contact service
// ============================================================================

pub struct ContactService {
    directory: Arc<dyn AccountDirectory>,
    gate: Arc<RequestGate>,
    router: Arc<DeliveryRouter>,
}

impl ContactService {
    pub fn new(
        directory: Arc<dyn AccountDirectory>,
        gate: Arc<RequestGate>,
        router: Arc<DeliveryRouter>,
    ) -> Self {
        ContactService {
            directory,
            gate,
            router,
        }
    }

    /// Looks up another account's public card.
    pub async fn find(&self, body: &[u8], signature: &[u8]) -> Result<Option<ContactCard>, AuthError> {
        let request: FindContactRequest = self.gate.admit(body, signature).await?;
        let card = self.directory.get(&request.contact_id)?.map(|identity| ContactCard {
            account_id: identity.account_id,
            public_key: STANDARD.encode(identity.public_key),
            profile: STANDARD.encode(identity.profile),
            version: identity.version,
        });
        Ok(card)
    }

    pub async fn add(&self, body: &[u8], signature: &[u8]) -> Result<AcceptedResponse, AuthError> {
        self.forward(MessageKind::Contact, body, signature).await
    }

    pub async fn confirm(&self, body: &[u8], signature: &[u8]) -> Result<AcceptedResponse, AuthError> {
        self.forward(MessageKind::Contact, body, signature).await
    }

    pub async fn send_message(&self, body: &[u8], signature: &[u8]) -> Result<AcceptedResponse, AuthError> {
        self.forward(MessageKind::Message, body, signature).await
    }

    async fn forward(
        &self,
        kind: MessageKind,
        body: &[u8],
        signature: &[u8],
    ) -> Result<AcceptedResponse, AuthError> {
        let request: ForwardRequest = self.gate.admit(body, signature).await?;
        if self.directory.lookup_public_key(&request.recipient_id)?.is_none() {
            return Err(AuthError::UnknownAccount);
        }

        let outcome = self
            .router
            .deliver_or_enqueue(
                kind,
                request.payload,
                request.payload_signature,
                &request.recipient_id,
            )
            .await?;
        match outcome {
            DeliveryOutcome::Delivered => debug!("{} delivered live", kind.as_str()),
            DeliveryOutcome::Queued => debug!("{} queued", kind.as_str()),
        }
        Ok(AcceptedResponse {
            accepted: true,
            timestamp: unix_now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::MemoryAccountDirectory;
    use crate::captcha::DisabledCaptcha;
    use crate::metrics::HubMetrics;
    use crate::pending::{MemoryPendingQueue, PendingQueue};
    use crate::presence::PresenceRegistry;
    use crate::proof_of_work::{derive_account_id, solve};
    use crate::router::tests::RecordingChannel;
    use crate::signature::Ed25519Verifier;
    use async_trait::async_trait;
    use ring::signature::{Ed25519KeyPair, KeyPair};

    struct RejectingCaptcha;

    #[async_trait]
    impl CaptchaVerifier for RejectingCaptcha {
        async fn verify(&self, _token: &str) -> bool {
            false
        }
    }

    struct Harness {
        accounts: AccountService,
        contacts: ContactService,
        directory: Arc<MemoryAccountDirectory>,
        presence: PresenceRegistry,
        queue: Arc<MemoryPendingQueue>,
        channel: Arc<RecordingChannel>,
    }

    fn harness_with(captcha: Arc<dyn CaptchaVerifier>) -> Harness {
        let directory = Arc::new(MemoryAccountDirectory::new());
        let verifier: Arc<dyn SignatureVerifier> = Arc::new(Ed25519Verifier);
        let gate = Arc::new(RequestGate::new(
            FreshnessGuard::default(),
            verifier.clone(),
            directory.clone(),
        ));
        let presence = PresenceRegistry::in_memory();
        let queue = Arc::new(MemoryPendingQueue::new());
        let channel = Arc::new(RecordingChannel::reachable(&["bob-conn"]));
        let router = Arc::new(DeliveryRouter::new(
            presence.clone(),
            channel.clone(),
            queue.clone(),
            HubMetrics::new(),
        ));
        Harness {
            accounts: AccountService::new(
                directory.clone(),
                FreshnessGuard::default(),
                verifier,
                ProofOfWorkGuard::new(1),
                captcha,
                gate.clone(),
            ),
            contacts: ContactService::new(directory.clone(), gate, router),
            directory,
            presence,
            queue,
            channel,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(DisabledCaptcha))
    }

    fn keypair() -> Ed25519KeyPair {
        let rng = ring::rand::SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap()
    }

    fn register_body(key: &Ed25519KeyPair) -> RegisterRequest {
        let public_key = key.public_key().as_ref().to_vec();
        let (proof, nonce) = solve(&STANDARD.encode(&public_key), 1, 100_000).unwrap();
        RegisterRequest {
            account_id: derive_account_id(&public_key),
            signature_public_key: public_key,
            proof_of_work: proof,
            proof_of_work_nonce: nonce,
            captcha_token: "token".to_string(),
            timestamp: unix_now(),
        }
    }

    fn signed<T: Serialize>(key: &Ed25519KeyPair, request: &T) -> (Vec<u8>, Vec<u8>) {
        let body = rmp_serde::to_vec(request).unwrap();
        let sig = key.sign(&body).as_ref().to_vec();
        (body, sig)
    }

    fn add_account(h: &Harness, name: &str, key: &Ed25519KeyPair) {
        h.directory
            .create(Identity::new(name.to_string(), key.public_key().as_ref().to_vec()))
            .unwrap();
    }

    fn forward(from: &str, to: &str) -> ForwardRequest {
        ForwardRequest {
            account_id: from.to_string(),
            recipient_id: to.to_string(),
            payload: b"hello bob".to_vec(),
            payload_signature: vec![0x5A; 4],
            timestamp: unix_now(),
        }
    }

    #[tokio::test]
    async fn test_register_creates_account() {
        let h = harness();
        let key = keypair();
        let request = register_body(&key);
        let (body, sig) = signed(&key, &request);

        let response = h.accounts.register(&body, &sig).await.unwrap();
        assert_eq!(response.account_id, request.account_id);
        assert_eq!(response.version, 1);
        assert!(h.directory.lookup_public_key(&request.account_id).unwrap().is_some());

        // Second registration of the same id is refused
        let (body, sig) = signed(&key, &register_body(&key));
        assert!(matches!(
            h.accounts.register(&body, &sig).await,
            Err(AuthError::AccountExists)
        ));
    }

    #[tokio::test]
    async fn test_register_rejections_leave_no_account() {
        let h = harness();
        let key = keypair();

        // Wrong proof
        let mut request = register_body(&key);
        request.proof_of_work_nonce.push('x');
        let (body, sig) = signed(&key, &request);
        assert!(matches!(
            h.accounts.register(&body, &sig).await,
            Err(AuthError::ProofOfWorkFailed)
        ));

        // Signed by someone else
        let request = register_body(&key);
        let (body, _) = signed(&key, &request);
        let (_, foreign_sig) = signed(&keypair(), &request);
        assert!(matches!(
            h.accounts.register(&body, &foreign_sig).await,
            Err(AuthError::SignatureMismatch)
        ));

        // Stale
        let mut request = register_body(&key);
        request.timestamp -= 300;
        let (body, sig) = signed(&key, &request);
        assert!(matches!(
            h.accounts.register(&body, &sig).await,
            Err(AuthError::StaleTimestamp)
        ));

        assert_eq!(h.directory.account_count(), 0);
    }

    #[tokio::test]
    async fn test_register_requires_captcha() {
        let h = harness_with(Arc::new(RejectingCaptcha));
        let key = keypair();
        let (body, sig) = signed(&key, &register_body(&key));
        assert!(matches!(
            h.accounts.register(&body, &sig).await,
            Err(AuthError::CaptchaFailed)
        ));
        assert_eq!(h.directory.account_count(), 0);
    }

    #[tokio::test]
    async fn test_update_profile_bumps_version_with_cas() {
        let h = harness();
        let key = keypair();
        add_account(&h, "alice", &key);

        let request = UpdateProfileRequest {
            account_id: "alice".to_string(),
            profile: b"encrypted".to_vec(),
            expected_version: Some(1),
            timestamp: unix_now(),
        };
        let (body, sig) = signed(&key, &request);
        assert_eq!(h.accounts.update_profile(&body, &sig).await.unwrap().version, 2);

        // Same expected version again conflicts
        let (body, sig) = signed(&key, &request);
        let err = h.accounts.update_profile(&body, &sig).await.unwrap_err();
        assert_eq!(err.reason(), "version_conflict");
    }

    #[tokio::test]
    async fn test_contact_request_to_online_recipient() {
        let h = harness();
        let alice = keypair();
        add_account(&h, "alice", &alice);
        add_account(&h, "bob", &keypair());
        h.presence.register("bob", "bob-conn").await;

        let (body, sig) = signed(&alice, &forward("alice", "bob"));
        let response = h.contacts.add(&body, &sig).await.unwrap();
        assert!(response.accepted);

        let pushed = h.channel.pushed_to("bob-conn");
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].kind, MessageKind::Contact);
        assert_eq!(pushed[0].payload, b"hello bob".to_vec());
        assert_eq!(h.queue.message_count(), 0);
    }

    #[tokio::test]
    async fn test_contact_request_to_offline_recipient() {
        let h = harness();
        let alice = keypair();
        add_account(&h, "alice", &alice);
        add_account(&h, "bob", &keypair());

        let (body, sig) = signed(&alice, &forward("alice", "bob"));
        assert!(h.contacts.add(&body, &sig).await.unwrap().accepted);

        assert!(h.channel.pushed.lock().unwrap().is_empty());
        let rows = h.queue.drain("bob").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].recipient_id, "bob");
        assert_eq!(rows[0].payload_signature, vec![0x5A; 4]);
    }

    #[tokio::test]
    async fn test_rejected_forward_writes_nothing() {
        let h = harness();
        let alice = keypair();
        add_account(&h, "alice", &alice);
        add_account(&h, "bob", &keypair());

        let (body, _) = signed(&alice, &forward("alice", "bob"));
        let (_, wrong) = signed(&keypair(), &forward("alice", "bob"));
        assert!(h.contacts.send_message(&body, &wrong).await.is_err());

        let (body, sig) = signed(&alice, &forward("alice", "nobody"));
        assert!(matches!(
            h.contacts.send_message(&body, &sig).await,
            Err(AuthError::UnknownAccount)
        ));
        assert_eq!(h.queue.message_count(), 0);
    }

    #[tokio::test]
    async fn test_find_contact() {
        let h = harness();
        let alice = keypair();
        add_account(&h, "alice", &alice);
        add_account(&h, "bob", &keypair());

        let request = FindContactRequest {
            account_id: "alice".to_string(),
            contact_id: "bob".to_string(),
            timestamp: unix_now(),
        };
        let (body, sig) = signed(&alice, &request);
        let card = h.contacts.find(&body, &sig).await.unwrap().unwrap();
        assert_eq!(card.account_id, "bob");
        assert_eq!(card.version, 1);

        let request = FindContactRequest {
            contact_id: "carol".to_string(),
            ..request
        };
        let (body, sig) = signed(&alice, &request);
        assert!(h.contacts.find(&body, &sig).await.unwrap().is_none());
    }
}
