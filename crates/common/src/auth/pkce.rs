//! PKCE (Proof Key for Code Exchange) for OAuth 2.0
//!
//! Implements RFC 7636 so the desktop login works without a client secret.
//! Only the S256 challenge method is supported; the plain method is
//! deliberately not offered.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Generate a cryptographically secure code verifier
///
/// Returns a URL-safe base64-encoded random string of 32 bytes (43
/// characters). Per RFC 7636, verifiers must be 43-128 characters long.
#[must_use]
pub fn generate_code_verifier() -> String {
    let mut rng = rand::thread_rng();
    let random_bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Derive the code challenge from a verifier
///
/// Per RFC 7636, the challenge is BASE64URL(SHA256(ASCII(code_verifier))).
#[must_use]
pub fn derive_code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate a random state nonce for CSRF protection
#[must_use]
pub fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    let random_bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// One login attempt's PKCE material.
///
/// The verifier stays local until the token exchange; the challenge and
/// state travel in the authorization request. A fresh value set is
/// generated per attempt and never reused.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Random string (43 chars base64url), kept secret until token exchange
    pub verifier: String,

    /// SHA256 hash of the verifier (base64url), sent in the authorization
    /// request
    pub challenge: String,

    /// Random CSRF nonce, echoed back by the provider in the callback
    pub state: String,
}

impl PkceChallenge {
    /// Generate a fresh challenge set with secure random values.
    #[must_use]
    pub fn generate() -> Self {
        let verifier = generate_code_verifier();
        let challenge = derive_code_challenge(&verifier);
        let state = generate_state();
        Self { verifier, challenge, state }
    }

    /// The challenge method, always "S256".
    #[must_use]
    pub fn challenge_method(&self) -> &'static str {
        "S256"
    }
}
