//! Inbound callback state machine.
//!
//! Every request the hub sends to `/push-callback/...` is classified by its
//! `hub.mode` query parameter:
//!
//! | mode | precondition | success | failure |
//! |---|---|---|---|
//! | `subscribe` | topic registered | mark verified, echo challenge | 400 `Unexpected subscription` |
//! | `unsubscribe` | topic **not** registered | echo challenge | 400 `Unexpected unsubscribe` |
//! | `denied` | none | empty 200 | n/a |
//! | absent | id in path is known | verify, dedup, dispatch; empty 200 | 400 `Unknown subscription` |
//!
//! Unsubscribe confirmation relies on the facade removing the record before
//! the request is sent, so a still-registered topic means the hub is
//! confirming something the application did not ask for.
//!
//! This module is independent of any HTTP framework; the API crate converts
//! between its request/response types and the server's.

use crate::dedup::{DedupCache, MessageDigest};
use crate::dispatch::{Delivery, DeliverySender};
use crate::error::SignatureError;
use crate::registry::SubscriptionRegistry;
use crate::signature::{HubSignature, SIGNATURE_HEADER};
use crate::SubscriptionId;
use bytes::Bytes;
use chrono::Duration;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Longest lease accepted from a hub (ten years); longer grants are clamped.
pub const MAX_LEASE_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

/// Protocol mode of an inbound callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackMode {
    /// Hub verifies a subscribe (or renewal) request
    Subscribe,

    /// Hub verifies an unsubscribe request
    Unsubscribe,

    /// Hub refused the subscription
    Denied,

    /// Content distribution; routed by the id in the path
    Update,
}

impl CallbackMode {
    /// Classify a `hub.mode` value. Absent or unrecognised modes are updates.
    pub fn from_param(mode: Option<&str>) -> Self {
        match mode {
            Some("subscribe") => Self::Subscribe,
            Some("unsubscribe") => Self::Unsubscribe,
            Some("denied") => Self::Denied,
            _ => Self::Update,
        }
    }
}

// ============================================================================
// Callback Request/Response Types
// ============================================================================

/// Raw callback request as received from the hub.
///
/// Header names are matched case-insensitively.
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    path: String,
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
    body: Bytes,
}

impl CallbackRequest {
    /// Create a callback request.
    ///
    /// # Arguments
    ///
    /// * `path` - Request path, e.g. `/push-callback/3`
    /// * `query` - Decoded query parameters
    /// * `headers` - Request headers
    /// * `body` - Fully read request body
    pub fn new(
        path: impl Into<String>,
        query: HashMap<String, String>,
        headers: HashMap<String, String>,
        body: Bytes,
    ) -> Self {
        let headers = headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();

        Self {
            path: path.into(),
            query,
            headers,
            body,
        }
    }

    /// Decode a raw `a=b&c=d` query string.
    ///
    /// Repeated keys keep their first value.
    pub fn parse_query(raw: &str) -> HashMap<String, String> {
        let mut query = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            query
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }
        query
    }

    /// Request path, e.g. `/push-callback/3`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Header by name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Mode from `hub.mode`.
    pub fn mode(&self) -> CallbackMode {
        CallbackMode::from_param(self.param("hub.mode"))
    }

    /// `hub.topic`, or empty when absent.
    pub fn topic(&self) -> &str {
        self.param("hub.topic").unwrap_or_default()
    }

    /// `hub.challenge`, or empty when absent.
    pub fn challenge(&self) -> &str {
        self.param("hub.challenge").unwrap_or_default()
    }

    /// Lease granted in `hub.lease_seconds`, if present and valid.
    ///
    /// Grants above [`MAX_LEASE_SECONDS`] are clamped to it.
    pub fn lease(&self) -> Option<Duration> {
        self.param("hub.lease_seconds")
            .and_then(|value| value.trim().parse::<i64>().ok())
            .filter(|seconds| *seconds >= 0)
            .and_then(|seconds| Duration::try_seconds(seconds.min(MAX_LEASE_SECONDS)))
    }

    /// `Content-Type` header, or empty when absent.
    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or_default()
    }

    /// Raw request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Response to send back to the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResponse {
    /// 200 OK with a plain-text body (the echoed challenge, or empty)
    Ok { body: String },

    /// 400 Bad Request with a short reason
    BadRequest { message: String },
}

impl CallbackResponse {
    fn ok(body: impl Into<String>) -> Self {
        Self::Ok { body: body.into() }
    }

    fn bad_request(message: &str) -> Self {
        Self::BadRequest {
            message: message.to_string(),
        }
    }

    /// HTTP status code for this response.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Ok { .. } => 200,
            Self::BadRequest { .. } => 400,
        }
    }

    /// Response body.
    pub fn body(&self) -> &str {
        match self {
            Self::Ok { body } => body,
            Self::BadRequest { message } => message,
        }
    }

    /// Whether this is a 200 response.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

// ============================================================================
// Callback Handler
// ============================================================================

/// Validates inbound callbacks against registry state.
///
/// Owns the subscriber's deduplication ring; accepted updates are queued on
/// the delivery channel rather than executed inline.
pub struct CallbackHandler {
    registry: Arc<SubscriptionRegistry>,
    history: Mutex<DedupCache>,
    deliveries: DeliverySender,
}

impl CallbackHandler {
    /// Create a handler.
    ///
    /// # Arguments
    ///
    /// * `registry` - Shared subscription registry
    /// * `dedup_capacity` - Number of recent bodies remembered
    /// * `deliveries` - Queue feeding the update dispatcher
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        dedup_capacity: usize,
        deliveries: DeliverySender,
    ) -> Self {
        Self {
            registry,
            history: Mutex::new(DedupCache::new(dedup_capacity)),
            deliveries,
        }
    }

    /// Process one callback and produce the response for the hub.
    pub async fn handle(&self, request: &CallbackRequest) -> CallbackResponse {
        match request.mode() {
            CallbackMode::Subscribe => self.handle_subscribe(request).await,
            CallbackMode::Unsubscribe => self.handle_unsubscribe(request).await,
            CallbackMode::Denied => self.handle_denied(request),
            CallbackMode::Update => self.handle_update(request).await,
        }
    }

    async fn handle_subscribe(&self, request: &CallbackRequest) -> CallbackResponse {
        let topic = request.topic();

        match self.registry.mark_verified(topic, request.lease()).await {
            Some(subscription) => {
                info!(
                    topic = %topic,
                    subscription_id = %subscription.id,
                    lease_secs = subscription.lease.num_seconds(),
                    "Subscription verified"
                );
                CallbackResponse::ok(request.challenge())
            }
            None => {
                warn!(topic = %topic, "Unexpected subscription");
                CallbackResponse::bad_request("Unexpected subscription")
            }
        }
    }

    async fn handle_unsubscribe(&self, request: &CallbackRequest) -> CallbackResponse {
        let topic = request.topic();

        if self.registry.contains(topic).await {
            warn!(topic = %topic, "Unexpected unsubscribe");
            CallbackResponse::bad_request("Unexpected unsubscribe")
        } else {
            info!(topic = %topic, "Unsubscribe confirmed");
            CallbackResponse::ok(request.challenge())
        }
    }

    fn handle_denied(&self, request: &CallbackRequest) -> CallbackResponse {
        warn!(
            topic = %request.topic(),
            reason = %request.param("hub.reason").unwrap_or_default(),
            "Subscription denied"
        );
        CallbackResponse::ok("")
    }

    async fn handle_update(&self, request: &CallbackRequest) -> CallbackResponse {
        let subscription = match SubscriptionId::from_callback_path(request.path()) {
            Some(id) => self.registry.find_by_id(id).await,
            None => None,
        };

        let subscription = match subscription {
            Some(subscription) => subscription,
            None => {
                warn!(
                    path = %request.path(),
                    link = ?request.header("link"),
                    "Callback for unknown subscription"
                );
                return CallbackResponse::bad_request("Unknown subscription");
            }
        };

        debug!(subscription = %subscription, "Update received");

        if let Some(key) = subscription.secret_key() {
            if let Err(response) = verify_signature(request, key.as_bytes(), &subscription.topic) {
                return response;
            }
        }

        let digest = MessageDigest::of(request.body());
        let unique = self.history.lock().await.check_and_insert(digest);

        if !unique {
            debug!(
                subscription_id = %subscription.id,
                digest = ?digest,
                "Dropping duplicate update"
            );
            return CallbackResponse::ok("");
        }

        let delivery = Delivery {
            subscription_id: subscription.id,
            topic: subscription.topic.clone(),
            content_type: request.content_type().to_string(),
            body: request.body().clone(),
            handler: subscription.handler.clone(),
        };

        if self.deliveries.send(delivery).is_err() {
            error!(
                subscription_id = %subscription.id,
                "Delivery queue closed, update dropped"
            );
        }

        CallbackResponse::ok("")
    }
}

fn verify_signature(
    request: &CallbackRequest,
    key: &[u8],
    topic: &str,
) -> Result<(), CallbackResponse> {
    let header = request.header(SIGNATURE_HEADER).unwrap_or_default();

    let signature = match HubSignature::parse(header) {
        Ok(signature) => signature,
        Err(SignatureError::MalformedHeader) => {
            warn!(topic = %topic, "Signature not found or invalid");
            return Err(CallbackResponse::bad_request("Invalid Subscription"));
        }
        Err(e) => {
            warn!(topic = %topic, error = %e, "Unrecognised signature");
            return Err(CallbackResponse::bad_request("Invalid Signature"));
        }
    };

    match signature.verify(key, request.body()) {
        Ok(true) => Ok(()),
        Ok(false) => {
            warn!(
                topic = %topic,
                algorithm = %signature.algorithm(),
                "Signature mismatch"
            );
            Err(CallbackResponse::bad_request("Invalid Signature"))
        }
        Err(e) => {
            error!(topic = %topic, error = %e, "Signature verification failed");
            Err(CallbackResponse::bad_request("Invalid Signature"))
        }
    }
}

impl fmt::Debug for CallbackHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackHandler")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "callback_tests.rs"]
mod tests;
