//! Common test utilities for hubbub integration tests
//!
//! This module provides:
//! - A subscriber wired to a real HTTP transport pointed at a mock hub
//! - A recording update handler
//! - Request builders and polling helpers for callback tests

use axum::body::Body;
use axum::http::{Request, StatusCode};
use hubbub_api::{create_router, AppState, ServiceConfig};
use hubbub_core::{handler_fn, Subscriber, SubscriberConfig, UpdateHandler};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};
use tower::ServiceExt;
use wiremock::{MockServer, Request as HubRequest};

/// Callback base URL registered with hubs in these tests.
pub const SELF_URL: &str = "http://subscriber.test";

/// Identity sent in the `From` header.
#[allow(dead_code)]
pub const FROM_HEADER: &str = "integration (hubbub)";

// ============================================================================
// Subscriber Fixtures
// ============================================================================

/// Subscriber using the real HTTP transport and feed discoverer.
pub fn create_subscriber() -> Arc<Subscriber> {
    let config = SubscriberConfig::new(SELF_URL, "integration")
        .with_request_timeout(Duration::from_secs(5));
    Arc::new(Subscriber::new(config).unwrap())
}

/// Hub endpoint URL on the mock server.
#[allow(dead_code)]
pub fn hub_url(server: &MockServer) -> String {
    format!("{}/hub", server.uri())
}

// ============================================================================
// Recording Handler
// ============================================================================

/// Update handler recording `content_type|body` for each delivery
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(&self) -> Arc<dyn UpdateHandler> {
        let seen = self.seen.clone();
        handler_fn(move |content_type, body| {
            seen.lock().unwrap().push(format!(
                "{}|{}",
                content_type,
                String::from_utf8_lossy(&body)
            ));
        })
    }

    pub fn deliveries(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    /// Wait until at least `count` deliveries were recorded or a second passed.
    pub async fn wait_for(&self, count: usize) -> Vec<String> {
        for _ in 0..100 {
            if self.seen.lock().unwrap().len() >= count {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        self.deliveries()
    }
}

// ============================================================================
// Callback Requests
// ============================================================================

/// Send `request` through a fresh router for `subscriber`.
#[allow(dead_code)]
pub async fn send_callback(
    subscriber: Arc<Subscriber>,
    request: Request<Body>,
) -> (StatusCode, String) {
    let app = create_router(AppState::new(ServiceConfig::default(), subscriber));
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

/// Verification GET the hub would send for `topic`.
#[allow(dead_code)]
pub fn verification_request(callback: &str, mode: &str, topic: &str, challenge: &str) -> Request<Body> {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("hub.mode", mode)
        .append_pair("hub.topic", topic)
        .append_pair("hub.challenge", challenge)
        .append_pair("hub.lease_seconds", "86400")
        .finish();

    Request::builder()
        .method("GET")
        .uri(format!("{}?{}", callback_path(callback), query))
        .body(Body::empty())
        .unwrap()
}

/// Content distribution POST the hub would send.
#[allow(dead_code)]
pub fn update_request(
    callback: &str,
    content_type: &str,
    signature: Option<&str>,
    body: &'static str,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(callback_path(callback))
        .header("content-type", content_type);
    if let Some(signature) = signature {
        builder = builder.header("x-hub-signature", signature);
    }
    builder.body(Body::from(body)).unwrap()
}

fn callback_path(callback: &str) -> &str {
    callback.strip_prefix(SELF_URL).unwrap_or(callback)
}

// ============================================================================
// Mock Hub Inspection
// ============================================================================

/// Form parameters of a request received by the mock hub.
#[allow(dead_code)]
pub fn form_params(request: &HubRequest) -> HashMap<String, String> {
    url::form_urlencoded::parse(&request.body)
        .into_owned()
        .collect()
}

/// Wait until the mock hub has received `count` requests or a second passed.
#[allow(dead_code)]
pub async fn wait_for_hub_requests(server: &MockServer, count: usize) -> Vec<HubRequest> {
    for _ in 0..100 {
        let received = server.received_requests().await.unwrap_or_default();
        if received.len() >= count {
            return received;
        }
        sleep(Duration::from_millis(10)).await;
    }
    server.received_requests().await.unwrap_or_default()
}
