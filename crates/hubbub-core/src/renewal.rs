//! Periodic lease renewal.
//!
//! A single long-lived task wakes up on a fixed interval, scans the registry
//! and re-subscribes every record whose lease ran out more than the grace
//! window ago. Records that were never verified count as expired, so the
//! first scan after start doubles as the initial subscribe pass and every
//! failed request is retried on a later tick.
//!
//! The grace window (one hour by default) is much longer than the scan
//! interval (one minute) so a hub that is briefly unavailable is not flooded
//! with resubscription attempts.

use crate::hub_client::HubClient;
use crate::registry::{Subscription, SubscriptionRegistry};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Decide whether `subscription` needs a fresh subscribe request at `now`.
///
/// True when `verified_at + lease < now - grace`, or when the subscription
/// has never been verified. A lease or grace too large to add to a date
/// never counts as expired.
pub fn needs_renewal(subscription: &Subscription, now: DateTime<Utc>, grace: Duration) -> bool {
    if subscription.verified_at.is_none() {
        return true;
    }

    let Some(expires_at) = subscription.expires_at() else {
        return false;
    };

    match now.checked_sub_signed(grace) {
        Some(cutoff) => expires_at < cutoff,
        None => false,
    }
}

/// Recurring renewal task over a shared registry.
#[derive(Debug, Clone)]
pub struct RenewalScheduler {
    registry: Arc<SubscriptionRegistry>,
    hub_client: HubClient,
    interval: std::time::Duration,
    grace: Duration,
}

impl RenewalScheduler {
    /// Create a scheduler.
    ///
    /// # Arguments
    ///
    /// * `registry` - Registry to scan
    /// * `hub_client` - Client used for subscribe requests
    /// * `interval` - Time between scans
    /// * `grace` - How long past expiry a lease may be before renewing
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        hub_client: HubClient,
        interval: std::time::Duration,
        grace: Duration,
    ) -> Self {
        Self {
            registry,
            hub_client,
            interval,
            grace,
        }
    }

    /// Run one scan at `now`, returning the number of subscribe requests sent.
    ///
    /// Requests are sent one after another; a failing or slow hub only delays
    /// the rest of this scan.
    pub async fn scan_at(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<Subscription> = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|subscription| needs_renewal(subscription, now, self.grace))
            .collect();

        for subscription in &due {
            debug!(
                topic = %subscription.topic,
                subscription_id = %subscription.id,
                expires_at = ?subscription.expires_at(),
                "Lease expired, renewing"
            );
            // Failures are logged by the client and retried next tick.
            let _ = self.hub_client.request_subscribe(subscription).await;
        }

        due.len()
    }

    /// Run one scan at the current time.
    pub async fn scan(&self) -> usize {
        self.scan_at(Utc::now()).await
    }

    /// Scan on every interval tick until `shutdown` flips to `true`.
    ///
    /// The first tick fires immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.interval.as_secs(),
            grace_secs = self.grace.num_seconds(),
            "Renewal scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let renewed = self.scan().await;
                    if renewed > 0 {
                        info!(renewed, "Renewal scan sent subscribe requests");
                    }
                }
            }
        }

        info!("Renewal scheduler stopped");
    }
}

#[cfg(test)]
#[path = "renewal_tests.rs"]
mod tests;
