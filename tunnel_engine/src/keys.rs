//! WireGuard key pairs.

use crate::error::EngineResult;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};

/// Base64 encoded Curve25519 private key.
///
/// Only ever written into the netdev unit; `Debug` is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(String);

impl PrivateKey {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([redacted])")
    }
}

/// Freshly generated key pair.
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// Base64 public key, sent to the backend
    pub public_key: String,
    pub private_key: PrivateKey,
}

/// Source of key pairs for the modern transport.
pub trait KeyPairProvider {
    fn generate(&self) -> EngineResult<KeyPair>;
}

/// Generates keys in-process from the OS random number generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct X25519KeyPairProvider;

impl KeyPairProvider for X25519KeyPairProvider {
    fn generate(&self) -> EngineResult<KeyPair> {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);

        Ok(KeyPair {
            public_key: BASE64.encode(public.as_bytes()),
            private_key: PrivateKey(BASE64.encode(secret.to_bytes())),
        })
    }
}
