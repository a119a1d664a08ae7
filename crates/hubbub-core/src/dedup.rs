//! Bounded history of recently processed notification bodies.
//!
//! Hubs commonly redeliver the same notification. The subscriber keeps the
//! digests of the last `capacity` bodies in a ring and drops any body whose
//! digest is still in the ring. Once the ring is full the oldest digest is
//! overwritten, so a body repeated after more than `capacity` other bodies is
//! treated as new again. Memory use is constant regardless of traffic.

use sha2::{Digest, Sha256};
use std::fmt;

/// Default number of digests remembered per subscriber.
pub const DEFAULT_DEDUP_CAPACITY: usize = 50;

/// Content digest of a notification body.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageDigest([u8; 32]);

impl MessageDigest {
    /// Digest the raw body of a notification
    pub fn of(body: &[u8]) -> Self {
        Self(Sha256::digest(body).into())
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for MessageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageDigest({})", hex::encode(&self.0[..8]))
    }
}

/// Fixed-capacity ring of message digests.
///
/// Not a set: [`insert`](Self::insert) is unconditional and may store a digest
/// that is already present. Callers sharing one cache between tasks should use
/// [`check_and_insert`](Self::check_and_insert) under a single lock so that
/// two concurrent duplicates cannot both be admitted.
#[derive(Debug, Clone)]
pub struct DedupCache {
    slots: Vec<Option<MessageDigest>>,
    next: usize,
}

impl DedupCache {
    /// Create an empty cache holding at most `capacity` digests.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            next: 0,
        }
    }

    /// Maximum number of digests held
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of digests currently held
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Whether no digest has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|slot| slot.is_none())
    }

    /// Scan the ring for `digest`.
    pub fn contains(&self, digest: &MessageDigest) -> bool {
        self.slots.iter().any(|slot| slot.as_ref() == Some(digest))
    }

    /// Record `digest`, overwriting the oldest slot once the ring is full.
    pub fn insert(&mut self, digest: MessageDigest) {
        self.slots[self.next] = Some(digest);
        self.next = (self.next + 1) % self.slots.len();
    }

    /// Record `digest` unless it is already held.
    ///
    /// Returns `true` if the digest was new and has been recorded.
    pub fn check_and_insert(&mut self, digest: MessageDigest) -> bool {
        if self.contains(&digest) {
            return false;
        }
        self.insert(digest);
        true
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

#[cfg(test)]
#[path = "dedup_tests.rs"]
mod tests;
