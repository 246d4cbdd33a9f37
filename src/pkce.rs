//! Proof Key for Code Exchange, S256 method.
//!
//! The verifier is a secret that only ever leaves this process in the code
//! exchange request. The authorization request carries its SHA-256 hash,
//! which lets the platform bind the authorization code to whoever holds the
//! verifier.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{distr::Alphanumeric, Rng};
use sha2::{Digest, Sha256};

/// Generates a verifier of `length` characters from `[A-Za-z0-9]`.
///
/// Characters are drawn uniformly from the thread-local CSPRNG, which is
/// seeded and periodically reseeded from the operating system.
#[must_use]
pub fn generate_verifier(length: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Derives the S256 code challenge: `BASE64URL(SHA256(verifier))` without
/// padding.
#[must_use]
pub fn derive_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_length_and_alphabet() {
        for length in [1, 43, 64, 128] {
            let verifier = generate_verifier(length);
            assert_eq!(verifier.len(), length);
            assert!(verifier.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn verifiers_are_unique() {
        assert_ne!(generate_verifier(64), generate_verifier(64));
    }

    #[test]
    fn challenge_is_deterministic() {
        let verifier = generate_verifier(64);
        assert_eq!(derive_challenge(&verifier), derive_challenge(&verifier));
    }

    #[test]
    fn challenge_is_url_safe_without_padding() {
        for _ in 0..32 {
            let challenge = derive_challenge(&generate_verifier(64));
            assert_eq!(challenge.len(), 43);
            assert!(!challenge.contains(['+', '/', '=']));
        }
    }

    #[test]
    fn challenge_matches_known_digest() {
        // SHA256("hello") = 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824
        assert_eq!(
            derive_challenge("hello"),
            "LPJNul-wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ"
        );
    }
}
