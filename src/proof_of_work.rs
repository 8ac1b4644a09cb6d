// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Registration Proof-of-Work
//!
//! A new account must present a puzzle solution bound to its public key:
//!
//! ```text
//! proof      = lowercase(base64(SHAKE128(public_key_b64 || nonce)[..32]))
//! valid      = proof starts with `difficulty` '0' characters
//! account_id = base64(SHAKE256(public_key)[..64])
//! ```
//!
//! The second hash ties the account identifier to the key, so a client cannot
//! claim an arbitrary id for a key it holds.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::{Shake128, Shake256};

/// Default number of leading '0' characters required in the proof.
pub const DEFAULT_DIFFICULTY: usize = 3;

const PROOF_HASH_LEN: usize = 32;
const ACCOUNT_ID_HASH_LEN: usize = 64;

/// Validates registration puzzles.
#[derive(Debug, Clone, Copy)]
pub struct ProofOfWorkGuard {
    difficulty: usize,
}

impl ProofOfWorkGuard {
    pub fn new(difficulty: usize) -> Self {
        ProofOfWorkGuard { difficulty }
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// Returns true if `proof` is the correct hash of `public_key_b64 + nonce`,
    /// meets the difficulty, and `account_id` is derived from the key.
    pub fn check_proof(
        &self,
        account_id: &str,
        proof: &str,
        nonce: &str,
        public_key_b64: &str,
    ) -> bool {
        let recomputed = proof_hash(public_key_b64, nonce);
        if recomputed != proof {
            return false;
        }
        if !meets_difficulty(&recomputed, self.difficulty) {
            return false;
        }

        let Ok(public_key) = STANDARD.decode(public_key_b64) else {
            return false;
        };
        derive_account_id(&public_key) == account_id
    }
}

impl Default for ProofOfWorkGuard {
    fn default() -> Self {
        Self::new(DEFAULT_DIFFICULTY)
    }
}

/// Computes the puzzle hash for a key/nonce pair.
pub fn proof_hash(public_key_b64: &str, nonce: &str) -> String {
    let mut hasher = Shake128::default();
    hasher.update(public_key_b64.as_bytes());
    hasher.update(nonce.as_bytes());
    let mut out = [0u8; PROOF_HASH_LEN];
    hasher.finalize_xof().read(&mut out);
    STANDARD.encode(out).to_lowercase()
}

/// Derives the account identifier bound to a public key.
pub fn derive_account_id(public_key: &[u8]) -> String {
    let mut hasher = Shake256::default();
    hasher.update(public_key);
    let mut out = [0u8; ACCOUNT_ID_HASH_LEN];
    hasher.finalize_xof().read(&mut out);
    STANDARD.encode(out)
}

fn meets_difficulty(proof: &str, difficulty: usize) -> bool {
    proof.len() >= difficulty && proof.bytes().take(difficulty).all(|b| b == b'0')
}

/// Searches nonces `0..max_attempts` for a solution. Client-side helper,
/// also used by tests and tooling.
pub fn solve(public_key_b64: &str, difficulty: usize, max_attempts: u64) -> Option<(String, String)> {
    (0..max_attempts).find_map(|n| {
        let nonce = n.to_string();
        let proof = proof_hash(public_key_b64, &nonce);
        meets_difficulty(&proof, difficulty).then_some((proof, nonce))
    })
}
