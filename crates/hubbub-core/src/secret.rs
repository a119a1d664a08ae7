//! Per-topic verification key derivation.
//!
//! The secret configured by the application is never sent to the hub as-is.
//! Instead the wire key for a topic is `hex(HMAC-SHA1(secret, topic))`, which
//! binds the key to the topic: the same configured secret yields a different
//! key for every topic it protects.

use crate::signature::{compute_hmac, SignatureAlgorithm};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Shared secret configured for a subscription.
///
/// An empty secret disables `hub.secret` on subscribe and signature
/// verification on delivery. The value is wiped from memory on drop and is
/// never printed by `Debug`.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct HubSecret(String);

impl HubSecret {
    /// Wrap a secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Whether signature handling is disabled for this subscription
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Derive the verification key for `topic`.
    ///
    /// Returns `None` when the secret is empty.
    pub fn derive_key(&self, topic: &str) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(derive_secret_key(&self.0, topic))
        }
    }
}

impl From<&str> for HubSecret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for HubSecret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Debug for HubSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            f.write_str("HubSecret(<none>)")
        } else {
            f.write_str("HubSecret(<REDACTED>)")
        }
    }
}

/// Derive the hex encoded verification key for a topic.
///
/// Pure and deterministic: `hex(HMAC-SHA1(key = secret, message = topic))`.
pub fn derive_secret_key(secret: &str, topic: &str) -> String {
    // HMAC accepts keys of any length, so construction cannot fail here.
    let mac = compute_hmac(SignatureAlgorithm::Sha1, secret.as_bytes(), topic.as_bytes())
        .unwrap_or_default();
    hex::encode(mac)
}

#[cfg(test)]
#[path = "secret_tests.rs"]
mod tests;
