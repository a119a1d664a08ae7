//! Tests for the callback state machine.

use super::*;
use crate::dispatch::{delivery_channel, handler_fn, DeliveryReceiver};
use crate::secret::{derive_secret_key, HubSecret};
use crate::signature::{sign, SignatureAlgorithm};

const HUB: &str = "https://hub.example.com/";
const TOPIC: &str = "https://example.com/feed";

// ============================================================================
// Test Helpers
// ============================================================================

fn setup() -> (Arc<SubscriptionRegistry>, CallbackHandler, DeliveryReceiver) {
    let registry = Arc::new(SubscriptionRegistry::new());
    let (sender, receiver) = delivery_channel();
    let handler = CallbackHandler::new(registry.clone(), 50, sender);
    (registry, handler, receiver)
}

async fn register(registry: &SubscriptionRegistry, secret: &str) -> crate::Subscription {
    registry
        .create(HUB, TOPIC, HubSecret::from(secret), handler_fn(|_, _| {}))
        .await
}

fn verification(mode: &str, topic: &str, extra: &[(&str, &str)]) -> CallbackRequest {
    let mut query = HashMap::new();
    query.insert("hub.mode".to_string(), mode.to_string());
    query.insert("hub.topic".to_string(), topic.to_string());
    query.insert("hub.challenge".to_string(), "c0ffee".to_string());
    for (key, value) in extra {
        query.insert(key.to_string(), value.to_string());
    }
    CallbackRequest::new("/push-callback/0", query, HashMap::new(), Bytes::new())
}

fn update(path: &str, headers: &[(&str, &str)], body: &'static str) -> CallbackRequest {
    let headers = headers
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    CallbackRequest::new(path, HashMap::new(), headers, Bytes::from_static(body.as_bytes()))
}

fn signed(secret: &str, body: &str) -> String {
    let key = derive_secret_key(secret, TOPIC);
    sign(SignatureAlgorithm::Sha1, key.as_bytes(), body.as_bytes()).unwrap()
}

// ============================================================================
// Test: Request Parsing
// ============================================================================

#[test]
fn test_mode_classification() {
    assert_eq!(CallbackMode::from_param(Some("subscribe")), CallbackMode::Subscribe);
    assert_eq!(CallbackMode::from_param(Some("unsubscribe")), CallbackMode::Unsubscribe);
    assert_eq!(CallbackMode::from_param(Some("denied")), CallbackMode::Denied);
    assert_eq!(CallbackMode::from_param(None), CallbackMode::Update);
    assert_eq!(CallbackMode::from_param(Some("publish")), CallbackMode::Update);
}

#[test]
fn test_parse_query_decodes_values() {
    let query = CallbackRequest::parse_query(
        "hub.mode=subscribe&hub.topic=https%3A%2F%2Fexample.com%2Ffeed&hub.challenge=a+b",
    );

    assert_eq!(query.get("hub.mode").map(String::as_str), Some("subscribe"));
    assert_eq!(query.get("hub.topic").map(String::as_str), Some(TOPIC));
    assert_eq!(query.get("hub.challenge").map(String::as_str), Some("a b"));
}

#[test]
fn test_headers_are_case_insensitive() {
    let request = update("/push-callback/0", &[("Content-Type", "application/atom+xml")], "");

    assert_eq!(request.header("content-type"), Some("application/atom+xml"));
    assert_eq!(request.header("CONTENT-TYPE"), Some("application/atom+xml"));
    assert_eq!(request.content_type(), "application/atom+xml");
}

#[test]
fn test_lease_parsing() {
    let valid = verification("subscribe", TOPIC, &[("hub.lease_seconds", "3600")]);
    let garbage = verification("subscribe", TOPIC, &[("hub.lease_seconds", "soon")]);
    let negative = verification("subscribe", TOPIC, &[("hub.lease_seconds", "-5")]);
    let absent = verification("subscribe", TOPIC, &[]);

    assert_eq!(valid.lease(), Some(Duration::seconds(3600)));
    assert_eq!(garbage.lease(), None);
    assert_eq!(negative.lease(), None);
    assert_eq!(absent.lease(), None);
}

#[test]
fn test_oversized_lease_is_clamped() {
    for seconds in ["10000000000000", "9223372036854775807"] {
        let request = verification("subscribe", TOPIC, &[("hub.lease_seconds", seconds)]);

        assert_eq!(
            request.lease(),
            Some(Duration::seconds(MAX_LEASE_SECONDS)),
            "lease {}",
            seconds
        );
    }
}

// ============================================================================
// Test: Subscribe Verification
// ============================================================================

#[tokio::test]
async fn test_subscribe_verification_echoes_challenge_and_records_lease() {
    let (registry, handler, _rx) = setup();
    register(&registry, "").await;

    let response = handler
        .handle(&verification("subscribe", TOPIC, &[("hub.lease_seconds", "86400")]))
        .await;

    assert_eq!(response.status_code(), 200);
    assert_eq!(response.body(), "c0ffee");
    let sub = registry.get(TOPIC).await.unwrap();
    assert!(sub.is_verified());
    assert_eq!(sub.lease, Duration::seconds(86400));
}

#[tokio::test]
async fn test_subscribe_verification_with_huge_lease_records_clamped_lease() {
    let (registry, handler, _rx) = setup();
    register(&registry, "").await;

    let response = handler
        .handle(&verification(
            "subscribe",
            TOPIC,
            &[("hub.lease_seconds", "9223372036854775807")],
        ))
        .await;

    assert_eq!(response.body(), "c0ffee");
    let sub = registry.get(TOPIC).await.unwrap();
    assert_eq!(sub.lease, Duration::seconds(MAX_LEASE_SECONDS));
    assert!(sub.expires_at().is_some());
}

#[tokio::test]
async fn test_subscribe_verification_with_bad_lease_keeps_previous_lease() {
    let (registry, handler, _rx) = setup();
    register(&registry, "").await;
    registry.mark_verified(TOPIC, Some(Duration::seconds(600))).await;

    let response = handler
        .handle(&verification("subscribe", TOPIC, &[("hub.lease_seconds", "abc")]))
        .await;

    assert!(response.is_success());
    assert_eq!(registry.get(TOPIC).await.unwrap().lease, Duration::seconds(600));
}

#[tokio::test]
async fn test_subscribe_verification_for_unknown_topic_is_rejected() {
    let (registry, handler, _rx) = setup();

    let response = handler
        .handle(&verification("subscribe", TOPIC, &[("hub.lease_seconds", "60")]))
        .await;

    assert_eq!(response.status_code(), 400);
    assert_eq!(response.body(), "Unexpected subscription");
    assert!(registry.is_empty().await);
}

// ============================================================================
// Test: Unsubscribe Verification
// ============================================================================

#[tokio::test]
async fn test_unsubscribe_verification_for_removed_topic_echoes_challenge() {
    let (_registry, handler, _rx) = setup();

    let response = handler.handle(&verification("unsubscribe", TOPIC, &[])).await;

    assert_eq!(response, CallbackResponse::Ok { body: "c0ffee".to_string() });
}

#[tokio::test]
async fn test_unsubscribe_verification_for_live_topic_is_rejected() {
    let (registry, handler, _rx) = setup();
    register(&registry, "").await;

    let response = handler.handle(&verification("unsubscribe", TOPIC, &[])).await;

    assert_eq!(response.status_code(), 400);
    assert_eq!(response.body(), "Unexpected unsubscribe");
    assert!(registry.contains(TOPIC).await);
}

// ============================================================================
// Test: Denial
// ============================================================================

#[tokio::test]
async fn test_denied_returns_empty_ok_without_state_change() {
    let (registry, handler, _rx) = setup();
    register(&registry, "").await;

    let response = handler
        .handle(&verification("denied", TOPIC, &[("hub.reason", "not allowed")]))
        .await;

    assert_eq!(response, CallbackResponse::Ok { body: String::new() });
    assert!(!registry.get(TOPIC).await.unwrap().is_verified());
}

// ============================================================================
// Test: Update Notifications
// ============================================================================

#[tokio::test]
async fn test_update_without_secret_is_queued() {
    let (registry, handler, mut rx) = setup();
    let sub = register(&registry, "").await;

    let response = handler
        .handle(&update(
            "/push-callback/0",
            &[("Content-Type", "application/atom+xml")],
            "<feed/>",
        ))
        .await;

    assert_eq!(response, CallbackResponse::Ok { body: String::new() });
    let delivery = rx.try_recv().unwrap();
    assert_eq!(delivery.subscription_id, sub.id);
    assert_eq!(delivery.topic, TOPIC);
    assert_eq!(delivery.content_type, "application/atom+xml");
    assert_eq!(delivery.body, Bytes::from_static(b"<feed/>"));
}

#[tokio::test]
async fn test_update_for_unknown_id_is_rejected() {
    let (registry, handler, mut rx) = setup();
    register(&registry, "").await;

    let response = handler.handle(&update("/push-callback/42", &[], "x")).await;

    assert_eq!(response.status_code(), 400);
    assert_eq!(response.body(), "Unknown subscription");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_update_with_malformed_path_is_rejected() {
    let (registry, handler, _rx) = setup();
    register(&registry, "").await;

    for path in ["/push-callback/", "/push-callback/abc", "/push-callback/0/extra"] {
        let response = handler.handle(&update(path, &[], "x")).await;
        assert_eq!(response.body(), "Unknown subscription", "path {}", path);
    }
}

#[tokio::test]
async fn test_duplicate_update_is_acknowledged_but_not_requeued() {
    let (registry, handler, mut rx) = setup();
    register(&registry, "").await;

    let first = handler.handle(&update("/push-callback/0", &[], "same")).await;
    let second = handler.handle(&update("/push-callback/0", &[], "same")).await;

    assert!(first.is_success());
    assert!(second.is_success());
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_evicted_update_is_queued_again() {
    let registry = Arc::new(SubscriptionRegistry::new());
    let (sender, mut rx) = delivery_channel();
    let handler = CallbackHandler::new(registry.clone(), 2, sender);
    register(&registry, "").await;

    for body in ["first", "second", "third"] {
        let response = handler.handle(&update("/push-callback/0", &[], body)).await;
        assert!(response.is_success());
    }
    let resent_first = handler.handle(&update("/push-callback/0", &[], "first")).await;
    let resent_third = handler.handle(&update("/push-callback/0", &[], "third")).await;

    assert!(resent_first.is_success());
    assert!(resent_third.is_success());
    let mut bodies = Vec::new();
    while let Ok(delivery) = rx.try_recv() {
        bodies.push(delivery.body);
    }
    assert_eq!(
        bodies,
        vec![
            Bytes::from_static(b"first"),
            Bytes::from_static(b"second"),
            Bytes::from_static(b"third"),
            Bytes::from_static(b"first"),
        ]
    );
}

#[tokio::test]
async fn test_concurrent_duplicates_are_queued_once() {
    let (registry, handler, mut rx) = setup();
    register(&registry, "").await;
    let request = update("/push-callback/0", &[], "racing");

    let (first, second) = tokio::join!(handler.handle(&request), handler.handle(&request));

    assert!(first.is_success());
    assert!(second.is_success());
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_concurrent_duplicates_across_tasks_are_queued_once() {
    let (registry, handler, mut rx) = setup();
    register(&registry, "").await;
    let handler = Arc::new(handler);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let handler = handler.clone();
            tokio::spawn(async move {
                handler
                    .handle(&update("/push-callback/0", &[], "racing"))
                    .await
            })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().is_success());
    }

    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_correctly_signed_update_is_queued() {
    let (registry, handler, mut rx) = setup();
    register(&registry, "s3cret").await;
    let signature = signed("s3cret", "payload");

    let response = handler
        .handle(&update(
            "/push-callback/0",
            &[("X-Hub-Signature", signature.as_str())],
            "payload",
        ))
        .await;

    assert!(response.is_success());
    assert!(rx.try_recv().is_ok());
}

#[tokio::test]
async fn test_sha256_signature_is_accepted() {
    let (registry, handler, mut rx) = setup();
    register(&registry, "s3cret").await;
    let key = derive_secret_key("s3cret", TOPIC);
    let signature = sign(SignatureAlgorithm::Sha256, key.as_bytes(), b"payload").unwrap();

    let response = handler
        .handle(&update(
            "/push-callback/0",
            &[("x-hub-signature", signature.as_str())],
            "payload",
        ))
        .await;

    assert!(response.is_success());
    assert!(rx.try_recv().is_ok());
}

#[tokio::test]
async fn test_missing_signature_is_invalid_subscription() {
    let (registry, handler, mut rx) = setup();
    register(&registry, "s3cret").await;

    let response = handler.handle(&update("/push-callback/0", &[], "payload")).await;

    assert_eq!(response.status_code(), 400);
    assert_eq!(response.body(), "Invalid Subscription");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_unknown_algorithm_is_invalid_signature() {
    let (registry, handler, _rx) = setup();
    register(&registry, "s3cret").await;

    let response = handler
        .handle(&update("/push-callback/0", &[("x-hub-signature", "md5=abcd")], "payload"))
        .await;

    assert_eq!(response.body(), "Invalid Signature");
}

#[tokio::test]
async fn test_signature_mismatch_is_rejected_and_not_remembered() {
    let (registry, handler, mut rx) = setup();
    register(&registry, "s3cret").await;
    let wrong = signed("other", "payload");
    let right = signed("s3cret", "payload");

    let rejected = handler
        .handle(&update("/push-callback/0", &[("x-hub-signature", wrong.as_str())], "payload"))
        .await;
    let accepted = handler
        .handle(&update("/push-callback/0", &[("x-hub-signature", right.as_str())], "payload"))
        .await;

    assert_eq!(rejected.body(), "Invalid Signature");
    assert!(accepted.is_success());
    // The rejected body must not have been recorded as seen.
    assert!(rx.try_recv().is_ok());
}

#[tokio::test]
async fn test_signature_header_ignored_without_secret() {
    let (registry, handler, mut rx) = setup();
    register(&registry, "").await;

    let response = handler
        .handle(&update("/push-callback/0", &[("x-hub-signature", "garbage")], "payload"))
        .await;

    assert!(response.is_success());
    assert!(rx.try_recv().is_ok());
}

#[tokio::test]
async fn test_update_after_queue_closed_still_acknowledged() {
    let (registry, handler, rx) = setup();
    register(&registry, "").await;
    drop(rx);

    let response = handler.handle(&update("/push-callback/0", &[], "payload")).await;

    assert!(response.is_success());
}
