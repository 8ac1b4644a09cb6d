// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Signed Envelopes
//!
//! Two carriers for the same idea, a payload plus a detached signature over
//! its exact bytes:
//!
//! - **Bearer token** (realtime handshake):
//!   `Authorization: Bearer base64(auth_envelope) "|" base64(signature)`
//!   where `auth_envelope` is the MessagePack array
//!   `[account_id, timestamp, nonce]`.
//! - **Signed request** (HTTP API): the body is a MessagePack record and the
//!   signature travels base64-encoded in `X-Signature`.
//!
//! Signatures are always checked over the bytes as received, never over a
//! re-encoding of the decoded value.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::accounts::AccountDirectory;
use crate::error::AuthError;
use crate::freshness::FreshnessGuard;
use crate::signature::{verify_off_thread, SignatureVerifier};

/// Header carrying the detached signature of a request body.
pub const SIGNATURE_HEADER: &str = "x-signature";

const BEARER_PREFIX: &str = "Bearer ";
const TOKEN_SEPARATOR: char = '|';

/// Handshake payload. Field order is part of the signed encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEnvelope {
    pub account_id: String,
    pub timestamp: i64,
    #[serde(with = "serde_bytes")]
    pub nonce: Vec<u8>,
}

impl AuthEnvelope {
    pub fn decode(raw: &[u8]) -> Result<Self, AuthError> {
        rmp_serde::from_slice(raw).map_err(|_| AuthError::MalformedCredential("auth envelope"))
    }

    /// Encodes the envelope as a positional MessagePack array.
    pub fn encode(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }
}

/// Extracts the token from an `Authorization` header value.
pub fn parse_bearer(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MalformedCredential("missing credential"))?;
    header
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MalformedCredential("not a bearer credential"))
}

/// Splits a bearer token into the raw auth bytes and the signature bytes.
pub fn split_token(token: &str) -> Result<(Vec<u8>, Vec<u8>), AuthError> {
    let mut segments = token.split(TOKEN_SEPARATOR);
    let (Some(auth), Some(signature), None) = (segments.next(), segments.next(), segments.next())
    else {
        return Err(AuthError::MalformedCredential("expected two segments"));
    };

    let auth = STANDARD
        .decode(auth)
        .map_err(|_| AuthError::MalformedCredential("auth segment"))?;
    let signature = STANDARD
        .decode(signature)
        .map_err(|_| AuthError::MalformedCredential("signature segment"))?;
    Ok((auth, signature))
}

/// Builds a bearer token from raw auth bytes and their signature.
pub fn build_token(raw_auth: &[u8], signature: &[u8]) -> String {
    format!(
        "{}{}{}",
        STANDARD.encode(raw_auth),
        TOKEN_SEPARATOR,
        STANDARD.encode(signature)
    )
}

/// Decodes the `X-Signature` header value.
pub fn decode_signature_header(value: Option<&str>) -> Result<Vec<u8>, AuthError> {
    let value = value.ok_or(AuthError::MalformedCredential("missing signature"))?;
    STANDARD
        .decode(value.trim())
        .map_err(|_| AuthError::MalformedCredential("signature encoding"))
}

/// A request record that names its signer and carries a timestamp.
pub trait SignedRequest: DeserializeOwned {
    fn account_id(&self) -> &str;
    fn timestamp(&self) -> i64;
}

/// Admission check for signed API requests against registered accounts.
pub struct RequestGate {
    freshness: FreshnessGuard,
    verifier: Arc<dyn SignatureVerifier>,
    directory: Arc<dyn AccountDirectory>,
}

impl RequestGate {
    pub fn new(
        freshness: FreshnessGuard,
        verifier: Arc<dyn SignatureVerifier>,
        directory: Arc<dyn AccountDirectory>,
    ) -> Self {
        RequestGate {
            freshness,
            verifier,
            directory,
        }
    }

    /// Decodes `body`, checks its timestamp, and verifies `signature` over
    /// `body` with the signer's registered key.
    pub async fn admit<T: SignedRequest>(&self, body: &[u8], signature: &[u8]) -> Result<T, AuthError> {
        let request: T = rmp_serde::from_slice(body)
            .map_err(|_| AuthError::MalformedCredential("request body"))?;

        if !self.freshness.is_valid(request.timestamp()) {
            return Err(AuthError::StaleTimestamp);
        }

        let public_key = self
            .directory
            .lookup_public_key(request.account_id())?
            .ok_or(AuthError::UnknownAccount)?;

        let verified = verify_off_thread(
            self.verifier.clone(),
            public_key,
            body.to_vec(),
            signature.to_vec(),
        )
        .await;
        if !verified {
            return Err(AuthError::SignatureMismatch);
        }

        Ok(request)
    }
}
