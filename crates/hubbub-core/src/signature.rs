//! Content signature verification for update notifications.
//!
//! Hubs sign each delivery with `x-hub-signature: <alg>=<hexdigest>`, the
//! HMAC of the raw body keyed with the subscription's derived secret. The
//! recognised algorithm names are the ones listed by the WebSub
//! recommendation: `sha1`, `sha256`, `sha384` and `sha512`.
//!
//! Digests are compared in constant time. Earlier subscriber implementations
//! compared the hex strings case-insensitively, which leaks timing
//! information; decoding the hex and comparing bytes accepts the same inputs
//! without that leak.

use crate::error::SignatureError;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use std::fmt;

/// Name of the inbound header carrying the content signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

/// HMAC algorithms accepted in `x-hub-signature`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl SignatureAlgorithm {
    /// Resolve an algorithm token from the signature header.
    ///
    /// Tokens are matched exactly; anything else is rejected.
    pub fn from_token(token: &str) -> Result<Self, SignatureError> {
        match token {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            other => Err(SignatureError::UnsupportedAlgorithm {
                algorithm: other.to_string(),
            }),
        }
    }

    /// The token used for this algorithm on the wire
    pub fn token(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A parsed `x-hub-signature` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubSignature {
    algorithm: SignatureAlgorithm,
    digest: String,
}

impl HubSignature {
    /// Parse a header value of the form `<alg>=<hexdigest>`.
    ///
    /// # Errors
    ///
    /// - [`SignatureError::MalformedHeader`] unless the value splits on `=`
    ///   into exactly two parts
    /// - [`SignatureError::UnsupportedAlgorithm`] for an unknown `<alg>`
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        let parts: Vec<&str> = header.split('=').collect();
        if parts.len() != 2 {
            return Err(SignatureError::MalformedHeader);
        }

        let algorithm = SignatureAlgorithm::from_token(parts[0])?;

        Ok(Self {
            algorithm,
            digest: parts[1].to_string(),
        })
    }

    /// Algorithm named by the header
    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Hex digest as sent by the hub
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Check the signature against `payload` using `key`.
    ///
    /// Returns `Ok(false)` on mismatch, including a digest that is not valid
    /// hex. Hex decoding accepts either case.
    pub fn verify(&self, key: &[u8], payload: &[u8]) -> Result<bool, SignatureError> {
        let expected = compute_hmac(self.algorithm, key, payload)?;

        let provided = match hex::decode(&self.digest) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(false),
        };

        Ok(constant_time_compare(&provided, &expected))
    }
}

/// Compute `HMAC(algorithm, key, message)`.
pub fn compute_hmac(
    algorithm: SignatureAlgorithm,
    key: &[u8],
    message: &[u8],
) -> Result<Vec<u8>, SignatureError> {
    match algorithm {
        SignatureAlgorithm::Sha1 => mac_bytes::<Hmac<Sha1>>(key, message),
        SignatureAlgorithm::Sha256 => mac_bytes::<Hmac<Sha256>>(key, message),
        SignatureAlgorithm::Sha384 => mac_bytes::<Hmac<Sha384>>(key, message),
        SignatureAlgorithm::Sha512 => mac_bytes::<Hmac<Sha512>>(key, message),
    }
}

/// Hex encoded signature header value for `payload`, as a hub would send it.
pub fn sign(
    algorithm: SignatureAlgorithm,
    key: &[u8],
    payload: &[u8],
) -> Result<String, SignatureError> {
    let mac = compute_hmac(algorithm, key, payload)?;
    Ok(format!("{}={}", algorithm, hex::encode(mac)))
}

fn mac_bytes<M: Mac + KeyInit>(key: &[u8], message: &[u8]) -> Result<Vec<u8>, SignatureError> {
    let mut mac = <M as KeyInit>::new_from_slice(key).map_err(|e| SignatureError::Hmac {
        message: format!("Failed to create HMAC instance: {}", e),
    })?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;

    // Lengths are public, only the contents need constant-time treatment.
    if a.len() != b.len() {
        return false;
    }

    a.ct_eq(b).into()
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
