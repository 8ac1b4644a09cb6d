// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error Types
//!
//! Internal error taxonomy. The variants carry enough detail for logs and
//! metrics; the HTTP and WebSocket edges collapse all of them into a single
//! opaque rejection so callers cannot tell "bad signature" from
//! "unknown account".

use thiserror::Error;

/// Reasons a handshake or signed request is refused.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed credential: {0}")]
    MalformedCredential(&'static str),
    #[error("timestamp outside freshness window")]
    StaleTimestamp,
    #[error("unknown account")]
    UnknownAccount,
    #[error("signature verification failed")]
    SignatureMismatch,
    #[error("presence registry unavailable")]
    RegistryUnavailable,
    #[error("proof of work rejected")]
    ProofOfWorkFailed,
    #[error("captcha verification failed")]
    CaptchaFailed,
    #[error("account already exists")]
    AccountExists,
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl AuthError {
    /// Short label used for the `reason` dimension of rejection metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MalformedCredential(_) => "malformed",
            AuthError::StaleTimestamp => "stale",
            AuthError::UnknownAccount => "unknown_account",
            AuthError::SignatureMismatch => "signature",
            AuthError::RegistryUnavailable => "registry",
            AuthError::ProofOfWorkFailed => "proof_of_work",
            AuthError::CaptchaFailed => "captcha",
            AuthError::AccountExists => "account_exists",
            AuthError::Storage(StoreError::VersionConflict { .. }) => "version_conflict",
            AuthError::Storage(_) => "storage",
        }
    }
}

/// Failures of the durable stores (account directory, pending queue).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("record not found")]
    NotFound,
    #[error("version conflict: expected {expected}, current {actual}")]
    VersionConflict { expected: i64, actual: i64 },
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Failures of the shared presence store.
#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("presence store unavailable: {0}")]
    Unavailable(String),
}

/// Failures talking to the captcha verification service.
#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("captcha secret is not configured")]
    NotConfigured,
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures while assembling the hub at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("storage: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("presence: {0}")]
    Presence(#[from] PresenceError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
