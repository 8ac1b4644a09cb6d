// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Detached Signature Verification
//!
//! Every state-changing request and every realtime handshake is authenticated
//! by a detached signature over the exact bytes the client sent. The scheme
//! is pluggable: Dilithium (level 5) is the default lattice scheme, Ed25519 is
//! available for deployments that do not need post-quantum keys.
//!
//! Verification never fails loudly. A malformed key, a truncated signature or
//! a mismatch all resolve to `false`.

use std::sync::Arc;

use pqcrypto_dilithium::dilithium5;
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _};
use ring::signature::{UnparsedPublicKey, ED25519};

/// Verifies detached signatures against a raw public key.
pub trait SignatureVerifier: Send + Sync {
    /// Returns true only if `signature` is a valid signature of `message`
    /// under `public_key`.
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;
}

/// Signature scheme selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureScheme {
    /// CRYSTALS-Dilithium, NIST level 5 parameter set.
    #[default]
    Dilithium5,
    /// Ed25519 (32-byte keys, 64-byte signatures).
    Ed25519,
}

impl SignatureScheme {
    /// Parses a scheme name as used in configuration. Unknown names yield None.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "dilithium5" | "dilithium" | "mldsa" => Some(SignatureScheme::Dilithium5),
            "ed25519" => Some(SignatureScheme::Ed25519),
            _ => None,
        }
    }
}

/// Dilithium level 5 verifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct DilithiumVerifier;

impl SignatureVerifier for DilithiumVerifier {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Ok(public_key) = dilithium5::PublicKey::from_bytes(public_key) else {
            return false;
        };
        let Ok(signature) = dilithium5::DetachedSignature::from_bytes(signature) else {
            return false;
        };
        dilithium5::verify_detached_signature(&signature, message, &public_key).is_ok()
    }
}

/// Ed25519 verifier backed by `ring`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        if public_key.len() != 32 || signature.len() != 64 {
            return false;
        }
        UnparsedPublicKey::new(&ED25519, public_key)
            .verify(message, signature)
            .is_ok()
    }
}

/// Builds the verifier for a configured scheme.
pub fn verifier_for(scheme: SignatureScheme) -> Arc<dyn SignatureVerifier> {
    match scheme {
        SignatureScheme::Dilithium5 => Arc::new(DilithiumVerifier),
        SignatureScheme::Ed25519 => Arc::new(Ed25519Verifier),
    }
}

/// Runs a verification on the blocking pool.
///
/// Lattice verification is CPU-heavy enough that it must not run on the
/// request-handling worker. A panicked or cancelled job counts as a failed
/// verification.
pub async fn verify_off_thread(
    verifier: Arc<dyn SignatureVerifier>,
    public_key: Vec<u8>,
    message: Vec<u8>,
    signature: Vec<u8>,
) -> bool {
    tokio::task::spawn_blocking(move || verifier.verify(&public_key, &message, &signature))
        .await
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pqcrypto_traits::sign::{DetachedSignature, PublicKey};
    use ring::signature::KeyPair;

    fn dilithium_fixture(message: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let (pk, sk) = dilithium5::keypair();
        let sig = dilithium5::detached_sign(message, &sk);
        (pk.as_bytes().to_vec(), sig.as_bytes().to_vec())
    }

    #[test]
    fn test_dilithium_valid_signature() {
        let message = b"add contact bob";
        let (pk, sig) = dilithium_fixture(message);
        assert!(DilithiumVerifier.verify(&pk, message, &sig));
    }

    #[test]
    fn test_dilithium_flipped_message_byte() {
        let message = b"add contact bob".to_vec();
        let (pk, sig) = dilithium_fixture(&message);
        for i in [0, message.len() / 2, message.len() - 1] {
            let mut tampered = message.clone();
            tampered[i] ^= 0x01;
            assert!(!DilithiumVerifier.verify(&pk, &tampered, &sig));
        }
    }

    #[test]
    fn test_dilithium_flipped_signature_byte() {
        let message = b"payload";
        let (pk, sig) = dilithium_fixture(message);
        for i in [0, sig.len() / 2, sig.len() - 1] {
            let mut tampered = sig.clone();
            tampered[i] ^= 0x80;
            assert!(!DilithiumVerifier.verify(&pk, message, &tampered));
        }
    }

    #[test]
    fn test_dilithium_wrong_key() {
        let message = b"payload";
        let (_, sig) = dilithium_fixture(message);
        let (other_pk, _) = dilithium_fixture(message);
        assert!(!DilithiumVerifier.verify(&other_pk, message, &sig));
    }

    #[test]
    fn test_dilithium_malformed_inputs_are_false() {
        assert!(!DilithiumVerifier.verify(&[1, 2, 3], b"m", &[4, 5, 6]));
        let (pk, _) = dilithium_fixture(b"m");
        assert!(!DilithiumVerifier.verify(&pk, b"m", &[]));
    }

    fn ed25519_fixture(message: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let rng = ring::rand::SystemRandom::new();
        let pkcs8 = ring::signature::Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let key_pair = ring::signature::Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let sig = key_pair.sign(message);
        (
            key_pair.public_key().as_ref().to_vec(),
            sig.as_ref().to_vec(),
        )
    }

    #[test]
    fn test_ed25519_valid_and_tampered() {
        let message = b"hello hub";
        let (pk, sig) = ed25519_fixture(message);
        assert!(Ed25519Verifier.verify(&pk, message, &sig));

        let mut bad_sig = sig.clone();
        bad_sig[10] ^= 0x01;
        assert!(!Ed25519Verifier.verify(&pk, message, &bad_sig));
        assert!(!Ed25519Verifier.verify(&pk, b"hello hug", &sig));
        assert!(!Ed25519Verifier.verify(&pk[..31], message, &sig));
    }

    #[test]
    fn test_scheme_parse() {
        assert_eq!(
            SignatureScheme::parse("Dilithium5"),
            Some(SignatureScheme::Dilithium5)
        );
        assert_eq!(
            SignatureScheme::parse("ed25519"),
            Some(SignatureScheme::Ed25519)
        );
        assert_eq!(SignatureScheme::parse("rsa"), None);
    }

    #[tokio::test]
    async fn test_verify_off_thread() {
        let message = b"offloaded".to_vec();
        let (pk, sig) = dilithium_fixture(&message);
        let verifier = verifier_for(SignatureScheme::Dilithium5);
        assert!(verify_off_thread(verifier.clone(), pk.clone(), message.clone(), sig.clone()).await);
        assert!(!verify_off_thread(verifier, pk, b"other".to_vec(), sig).await);
    }
}
