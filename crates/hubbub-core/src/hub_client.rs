//! Outbound subscribe and unsubscribe requests.
//!
//! Both requests are form-encoded POSTs to the subscription's hub:
//!
//! ```text
//! POST <hub>
//! Content-Type: application/x-www-form-urlencoded
//! From: <application> (hubbub)
//!
//! hub.callback=<self>/push-callback/<id>&hub.topic=<topic>&hub.mode=subscribe[&hub.secret=<key>]
//! ```
//!
//! The hub acknowledges with `202 Accepted` and verifies the intent later
//! through the callback endpoint. Anything other than 202 is a failure; the
//! failure is logged and left to the next renewal scan.

use crate::error::{HubRequestError, SubscriberError};
use crate::registry::Subscription;
use crate::{SubscriptionId, CALLBACK_PATH_PREFIX};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, FROM};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Content type of every hub request body.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Status code a hub returns when it accepts a request.
pub const ACCEPTED: u16 = 202;

/// Value of `hub.mode` on an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubMode {
    /// Request or renew a subscription
    Subscribe,

    /// Cancel a subscription
    Unsubscribe,
}

impl HubMode {
    /// Value sent as `hub.mode`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

impl fmt::Display for HubMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully built hub request, independent of the HTTP stack that sends it.
#[derive(Clone, PartialEq, Eq)]
pub struct HubRequest {
    /// Hub endpoint
    pub url: String,

    /// Value of the `From` header
    pub from: String,

    /// Form parameters in the order they are encoded
    pub params: Vec<(String, String)>,
}

impl HubRequest {
    /// Look up a form parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// URL-encoded request body.
    pub fn encoded_body(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params.iter())
            .finish()
    }
}

// Security: the body may carry the derived hub.secret
impl fmt::Debug for HubRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<(&str, &str)> = self
            .params
            .iter()
            .map(|(key, value)| {
                if key == "hub.secret" {
                    (key.as_str(), "<REDACTED>")
                } else {
                    (key.as_str(), value.as_str())
                }
            })
            .collect();

        f.debug_struct("HubRequest")
            .field("url", &self.url)
            .field("from", &self.from)
            .field("params", &params)
            .finish()
    }
}

/// HTTP transport used for hub requests.
///
/// Returns the response status code; classification of the status is left to
/// [`HubClient`].
#[async_trait]
pub trait HubTransport: Send + Sync {
    /// POST `request` to its hub as a form-encoded body.
    async fn post_form(&self, request: &HubRequest) -> Result<u16, HubRequestError>;
}

/// [`HubTransport`] backed by a `reqwest` client with a request timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, SubscriberError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SubscriberError::HttpClient {
                message: e.to_string(),
            })?;

        Ok(Self { client })
    }

    /// Wrap an already configured client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HubTransport for ReqwestTransport {
    async fn post_form(&self, request: &HubRequest) -> Result<u16, HubRequestError> {
        let url = reqwest::Url::parse(&request.url).map_err(|e| HubRequestError::InvalidRequest {
            message: format!("Invalid hub URL '{}': {}", request.url, e),
        })?;

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .header(FROM, request.from.as_str())
            .body(request.encoded_body())
            .send()
            .await
            .map_err(|e| HubRequestError::Transport {
                message: e.to_string(),
            })?;

        Ok(response.status().as_u16())
    }
}

/// Builds and sends protocol requests for subscription records.
///
/// Stateless apart from its configuration; safe to share between the facade
/// and the renewal task.
#[derive(Clone)]
pub struct HubClient {
    transport: Arc<dyn HubTransport>,
    self_url: String,
    from: String,
}

impl HubClient {
    /// Create a client.
    ///
    /// # Arguments
    ///
    /// * `transport` - HTTP transport for outbound requests
    /// * `self_url` - Base URL under which this subscriber is reachable
    /// * `from` - Value sent in the `From` header
    pub fn new(
        transport: Arc<dyn HubTransport>,
        self_url: impl Into<String>,
        from: impl Into<String>,
    ) -> Self {
        let self_url: String = self_url.into();
        Self {
            transport,
            self_url: self_url.trim_end_matches('/').to_string(),
            from: from.into(),
        }
    }

    /// Callback URL the hub should use for subscription `id`.
    pub fn callback_url(&self, id: SubscriptionId) -> String {
        format!("{}{}{}", self.self_url, CALLBACK_PATH_PREFIX, id)
    }

    /// Build the request for `mode` without sending it.
    ///
    /// `hub.secret` is only included on subscribe and only when the
    /// subscription has a secret.
    pub fn build_request(&self, mode: HubMode, subscription: &Subscription) -> HubRequest {
        let mut params = vec![
            (
                "hub.callback".to_string(),
                self.callback_url(subscription.id),
            ),
            ("hub.topic".to_string(), subscription.topic.clone()),
            ("hub.mode".to_string(), mode.as_str().to_string()),
        ];

        if mode == HubMode::Subscribe {
            if let Some(key) = subscription.secret_key() {
                params.push(("hub.secret".to_string(), key));
            }
        }

        HubRequest {
            url: subscription.hub.clone(),
            from: self.from.clone(),
            params,
        }
    }

    /// Ask the hub to (re)subscribe `subscription`.
    ///
    /// Failures are logged here; callers may ignore the result.
    #[instrument(skip(self, subscription), fields(topic = %subscription.topic, subscription_id = %subscription.id))]
    pub async fn request_subscribe(&self, subscription: &Subscription) -> Result<(), HubRequestError> {
        info!(
            hub = %subscription.hub,
            callback = %self.callback_url(subscription.id),
            "Subscribing, waiting for verification callback"
        );
        self.send(HubMode::Subscribe, subscription).await
    }

    /// Ask the hub to drop `subscription`.
    #[instrument(skip(self, subscription), fields(topic = %subscription.topic, subscription_id = %subscription.id))]
    pub async fn request_unsubscribe(
        &self,
        subscription: &Subscription,
    ) -> Result<(), HubRequestError> {
        info!(hub = %subscription.hub, "Unsubscribing");
        self.send(HubMode::Unsubscribe, subscription).await
    }

    async fn send(&self, mode: HubMode, subscription: &Subscription) -> Result<(), HubRequestError> {
        let request = self.build_request(mode, subscription);

        let result = match self.transport.post_form(&request).await {
            Ok(ACCEPTED) => Ok(()),
            Ok(status) => Err(HubRequestError::UnexpectedStatus { status }),
            Err(e) => Err(e),
        };

        if let Err(ref e) = result {
            warn!(
                mode = %mode,
                subscription = %subscription,
                error = %e,
                transient = e.is_transient(),
                "Hub request failed"
            );
        }

        result
    }
}

impl fmt::Debug for HubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubClient")
            .field("self_url", &self.self_url)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "hub_client_tests.rs"]
mod tests;
