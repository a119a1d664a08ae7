//! Tests for lease renewal.

use super::*;
use crate::dispatch::handler_fn;
use crate::error::HubRequestError;
use crate::hub_client::{HubRequest, HubTransport};
use crate::secret::HubSecret;
use async_trait::async_trait;
use tokio::sync::Mutex;

// ============================================================================
// Mock Transport
// ============================================================================

#[derive(Default)]
struct RecordingTransport {
    requests: Mutex<Vec<HubRequest>>,
}

impl RecordingTransport {
    async fn topics(&self) -> Vec<String> {
        self.requests
            .lock()
            .await
            .iter()
            .filter_map(|r| r.param("hub.topic").map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl HubTransport for RecordingTransport {
    async fn post_form(&self, request: &HubRequest) -> Result<u16, HubRequestError> {
        self.requests.lock().await.push(request.clone());
        Ok(202)
    }
}

// ============================================================================
// Test Helpers
// ============================================================================

fn hour() -> Duration {
    Duration::hours(1)
}

async fn setup() -> (
    Arc<SubscriptionRegistry>,
    Arc<RecordingTransport>,
    RenewalScheduler,
) {
    let registry = Arc::new(SubscriptionRegistry::new());
    let transport = Arc::new(RecordingTransport::default());
    let client = HubClient::new(transport.clone(), "https://me.example.com", "app");
    let scheduler = RenewalScheduler::new(
        registry.clone(),
        client,
        std::time::Duration::from_secs(60),
        hour(),
    );
    (registry, transport, scheduler)
}

async fn add(registry: &SubscriptionRegistry, topic: &str) -> Subscription {
    registry
        .create(
            "https://hub.example.com/",
            topic,
            HubSecret::default(),
            handler_fn(|_, _| {}),
        )
        .await
}

// ============================================================================
// Test: needs_renewal
// ============================================================================

#[tokio::test]
async fn test_never_verified_subscription_needs_renewal() {
    let registry = SubscriptionRegistry::new();
    let sub = add(&registry, "https://example.com/a").await;

    assert!(needs_renewal(&sub, Utc::now(), hour()));
}

#[tokio::test]
async fn test_lease_expired_beyond_grace_needs_renewal() {
    let registry = SubscriptionRegistry::new();
    add(&registry, "https://example.com/a").await;
    let now = Utc::now();
    let verified_at = now - Duration::days(2);

    let sub = registry
        .mark_verified_at("https://example.com/a", Some(Duration::days(1)), verified_at)
        .await
        .unwrap();

    // Lease ended a day ago, well past the one hour grace window.
    assert!(needs_renewal(&sub, now, hour()));
}

#[tokio::test]
async fn test_lease_within_grace_window_does_not_need_renewal() {
    let registry = SubscriptionRegistry::new();
    add(&registry, "https://example.com/a").await;
    let now = Utc::now();

    // Expired thirty minutes ago: inside the grace window.
    let sub = registry
        .mark_verified_at(
            "https://example.com/a",
            Some(Duration::hours(1)),
            now - Duration::minutes(90),
        )
        .await
        .unwrap();

    assert!(!needs_renewal(&sub, now, hour()));
}

#[tokio::test]
async fn test_active_lease_does_not_need_renewal() {
    let registry = SubscriptionRegistry::new();
    add(&registry, "https://example.com/a").await;
    let now = Utc::now();

    let sub = registry
        .mark_verified_at("https://example.com/a", Some(Duration::days(10)), now)
        .await
        .unwrap();

    assert!(!needs_renewal(&sub, now, hour()));
}

#[tokio::test]
async fn test_lease_past_date_range_never_needs_renewal() {
    let registry = SubscriptionRegistry::new();
    add(&registry, "https://example.com/a").await;
    let now = Utc::now();

    let sub = registry
        .mark_verified_at(
            "https://example.com/a",
            Some(Duration::seconds(10_000_000_000_000)),
            now,
        )
        .await
        .unwrap();

    assert_eq!(sub.expires_at(), None);
    assert!(!needs_renewal(&sub, now, hour()));
}

#[tokio::test]
async fn test_grace_past_date_range_never_needs_renewal() {
    let registry = SubscriptionRegistry::new();
    add(&registry, "https://example.com/a").await;
    let now = Utc::now();

    let sub = registry
        .mark_verified_at(
            "https://example.com/a",
            Some(Duration::hours(1)),
            now - Duration::days(2),
        )
        .await
        .unwrap();

    assert!(!needs_renewal(&sub, now, Duration::milliseconds(i64::MAX)));
}

// ============================================================================
// Test: Scanning
// ============================================================================

#[tokio::test]
async fn test_scan_renews_only_expired_subscriptions() {
    let (registry, transport, scheduler) = setup().await;
    let now = Utc::now();
    add(&registry, "https://example.com/expired").await;
    add(&registry, "https://example.com/fresh").await;
    add(&registry, "https://example.com/pending").await;
    registry
        .mark_verified_at(
            "https://example.com/expired",
            Some(Duration::hours(1)),
            now - Duration::hours(3),
        )
        .await;
    registry
        .mark_verified_at("https://example.com/fresh", Some(Duration::days(1)), now)
        .await;

    let renewed = scheduler.scan_at(now).await;

    assert_eq!(renewed, 2);
    let mut topics = transport.topics().await;
    topics.sort();
    assert_eq!(
        topics,
        vec![
            "https://example.com/expired".to_string(),
            "https://example.com/pending".to_string()
        ]
    );
}

#[tokio::test]
async fn test_each_scan_sends_exactly_one_request_per_due_subscription() {
    let (registry, transport, scheduler) = setup().await;
    add(&registry, "https://example.com/a").await;

    scheduler.scan().await;
    scheduler.scan().await;

    assert_eq!(transport.topics().await.len(), 2);
}

#[tokio::test]
async fn test_scan_skips_lease_past_date_range() {
    let (registry, transport, scheduler) = setup().await;
    let now = Utc::now();
    add(&registry, "https://example.com/forever").await;
    registry
        .mark_verified_at(
            "https://example.com/forever",
            Some(Duration::seconds(10_000_000_000_000)),
            now,
        )
        .await;

    assert_eq!(scheduler.scan_at(now).await, 0);
    assert!(transport.topics().await.is_empty());
}

#[tokio::test]
async fn test_scan_of_empty_registry_sends_nothing() {
    let (_registry, transport, scheduler) = setup().await;

    assert_eq!(scheduler.scan().await, 0);
    assert!(transport.topics().await.is_empty());
}

#[tokio::test]
async fn test_run_scans_immediately_and_stops_on_shutdown() {
    let (registry, transport, scheduler) = setup().await;
    add(&registry, "https://example.com/a").await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(scheduler.run(shutdown_rx));

    for _ in 0..100 {
        if !transport.topics().await.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(transport.topics().await.len(), 1);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(1), task)
        .await
        .expect("scheduler should stop after shutdown")
        .unwrap();
}
