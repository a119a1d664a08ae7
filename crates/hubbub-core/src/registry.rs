//! In-memory registry of subscriptions.
//!
//! The registry is the single source of truth for subscription state. It is
//! shared by the caller-facing facade, the renewal task and the callback
//! handler, so every operation runs inside one coarse critical section and
//! hands out owned snapshots rather than references into the map.
//!
//! A record exists for a topic exactly as long as the application is
//! interested in it. Removal happens before the hub confirms an unsubscribe,
//! and the absence of a record is what confirms the unsubscribe callback.

use crate::dispatch::UpdateHandler;
use crate::secret::HubSecret;
use crate::SubscriptionId;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Snapshot of a single subscription.
#[derive(Clone)]
pub struct Subscription {
    /// Hub endpoint for the topic
    pub hub: String,

    /// Topic URL; unique within a registry
    pub topic: String,

    /// Shared secret; empty disables signatures
    pub secret: HubSecret,

    /// Identifier embedded in the callback URL
    pub id: SubscriptionId,

    /// Application handler for update notifications
    pub handler: Arc<dyn UpdateHandler>,

    /// Lease granted by the hub; zero until first verified
    pub lease: Duration,

    /// Time of the last successful verification
    pub verified_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Whether the hub has verified this subscription at least once.
    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }

    /// Time at which the current lease runs out.
    ///
    /// `None` while the subscription is still pending, or when the lease
    /// reaches past the representable date range.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.verified_at
            .and_then(|verified_at| verified_at.checked_add_signed(self.lease))
    }

    /// Verification key derived from the secret for this topic.
    pub fn secret_key(&self) -> Option<String> {
        self.secret.derive_key(&self.topic)
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (#{} {}s)",
            self.topic,
            self.id,
            self.lease.num_seconds()
        )
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("hub", &self.hub)
            .field("topic", &self.topic)
            .field("secret", &self.secret)
            .field("id", &self.id)
            .field("lease", &self.lease)
            .field("verified_at", &self.verified_at)
            .finish_non_exhaustive()
    }
}

/// Thread-safe topic → subscription map with identifier allocation.
///
/// Identifiers come from a per-registry counter, so independent subscribers
/// in one process never collide.
pub struct SubscriptionRegistry {
    subscriptions: Mutex<HashMap<String, Subscription>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register interest in `topic`, replacing any existing record.
    ///
    /// The new record always receives a fresh identifier and starts pending.
    pub async fn create(
        &self,
        hub: impl Into<String>,
        topic: impl Into<String>,
        secret: HubSecret,
        handler: Arc<dyn UpdateHandler>,
    ) -> Subscription {
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscription = Subscription {
            hub: hub.into(),
            topic: topic.into(),
            secret,
            id,
            handler,
            lease: Duration::zero(),
            verified_at: None,
        };

        let mut subscriptions = self.subscriptions.lock().await;
        if let Some(previous) = subscriptions.insert(subscription.topic.clone(), subscription.clone())
        {
            debug!(
                topic = %previous.topic,
                previous_id = %previous.id,
                subscription_id = %id,
                "Replaced existing subscription"
            );
        }

        subscription
    }

    /// Remove the record for `topic`, returning it if it existed.
    pub async fn remove(&self, topic: &str) -> Option<Subscription> {
        self.subscriptions.lock().await.remove(topic)
    }

    /// Look up the record for `topic`.
    pub async fn get(&self, topic: &str) -> Option<Subscription> {
        self.subscriptions.lock().await.get(topic).cloned()
    }

    /// Whether a record exists for `topic`.
    pub async fn contains(&self, topic: &str) -> bool {
        self.subscriptions.lock().await.contains_key(topic)
    }

    /// Look up a record by its callback identifier.
    pub async fn find_by_id(&self, id: SubscriptionId) -> Option<Subscription> {
        self.subscriptions
            .lock()
            .await
            .values()
            .find(|subscription| subscription.id == id)
            .cloned()
    }

    /// Snapshot of all records, ordered by identifier.
    pub async fn list(&self) -> Vec<Subscription> {
        let mut subscriptions: Vec<Subscription> =
            self.subscriptions.lock().await.values().cloned().collect();
        subscriptions.sort_by_key(|subscription| subscription.id);
        subscriptions
    }

    /// Number of registered topics.
    pub async fn len(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    /// Whether no topic is registered.
    pub async fn is_empty(&self) -> bool {
        self.subscriptions.lock().await.is_empty()
    }

    /// Record a successful verification of `topic` at the current time.
    ///
    /// A `lease` of `None` keeps the previously granted lease. Returns the
    /// updated record, or `None` if the topic is not registered.
    pub async fn mark_verified(&self, topic: &str, lease: Option<Duration>) -> Option<Subscription> {
        self.mark_verified_at(topic, lease, Utc::now()).await
    }

    /// Record a successful verification of `topic` at `now`.
    pub async fn mark_verified_at(
        &self,
        topic: &str,
        lease: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Option<Subscription> {
        let mut subscriptions = self.subscriptions.lock().await;
        let subscription = subscriptions.get_mut(topic)?;

        subscription.verified_at = Some(now);
        if let Some(lease) = lease {
            subscription.lease = lease;
        }

        Some(subscription.clone())
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
