//! The subscriber facade.
//!
//! [`Subscriber`] owns one registry, one hub client, one callback handler and
//! the two background tasks (renewal and update dispatch). It is the only
//! type most applications touch.
//!
//! ## Lifecycle
//!
//! A subscriber starts idle. While idle, `subscribe` and `unsubscribe` only
//! change the registry. `start` spawns the renewal task, whose first scan
//! sends the initial subscribe requests. `stop` signals it, waits for it and
//! returns to idle; the subscriber may be started again.
//!
//! Callbacks are answered and accepted updates dispatched in either state.
//! The update dispatcher is spawned on first use and lives as long as the
//! subscriber.

use crate::callback::{CallbackHandler, CallbackRequest, CallbackResponse};
use crate::dedup::DEFAULT_DEDUP_CAPACITY;
use crate::discovery::{FeedDiscoverer, HubDiscoverer};
use crate::dispatch::{delivery_channel, Dispatcher, UpdateHandler};
use crate::error::SubscriberError;
use crate::hub_client::{HubClient, HubTransport, ReqwestTransport};
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::renewal::RenewalScheduler;
use crate::secret::HubSecret;
use crate::{SubscriberResult, SubscriptionId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

/// Longest accepted renewal grace window.
pub const MAX_RENEWAL_GRACE_DAYS: i64 = 365;

/// Suffix appended to the application name in the `From` header.
pub const FROM_SUFFIX: &str = "(hubbub)";

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a [`Subscriber`].
///
/// # Examples
///
/// ```rust
/// use hubbub_core::SubscriberConfig;
/// use std::time::Duration;
///
/// let config = SubscriberConfig::new("https://subscriber.example.com", "my-app")
///     .with_request_timeout(Duration::from_secs(10))
///     .with_dedup_capacity(100);
///
/// assert_eq!(config.from_header(), "my-app (hubbub)");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Base URL under which the callback router is reachable
    pub self_url: String,

    /// Application name sent in the `From` header
    pub from: String,

    /// Upper bound for every outbound HTTP request
    pub request_timeout: Duration,

    /// Time between renewal scans
    pub renewal_interval: Duration,

    /// How long past expiry a lease may be before it is renewed
    pub renewal_grace: chrono::Duration,

    /// Number of recent update bodies remembered for deduplication
    pub dedup_capacity: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            self_url: "http://localhost:8080".to_string(),
            from: "hubbub-subscriber".to_string(),
            request_timeout: Duration::from_secs(30),
            renewal_interval: Duration::from_secs(60),
            renewal_grace: chrono::Duration::hours(1),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

impl SubscriberConfig {
    /// Create a configuration with default timings.
    pub fn new(self_url: impl Into<String>, from: impl Into<String>) -> Self {
        Self::default().with_self_url(self_url).with_from(from)
    }

    /// Set the base URL; a trailing slash is dropped.
    pub fn with_self_url(mut self, self_url: impl Into<String>) -> Self {
        let self_url: String = self_url.into();
        self.self_url = self_url.trim_end_matches('/').to_string();
        self
    }

    /// Set the application name used in the `From` header.
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Set the timeout for outbound HTTP requests.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the time between renewal scans.
    pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
        self.renewal_interval = interval;
        self
    }

    /// Set how far past expiry a lease may be before it is renewed.
    pub fn with_renewal_grace(mut self, grace: chrono::Duration) -> Self {
        self.renewal_grace = grace;
        self
    }

    /// Set how many recent update bodies are remembered.
    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    /// Value of the `From` header on hub requests.
    pub fn from_header(&self) -> String {
        format!("{} {}", self.from, FROM_SUFFIX)
    }

    /// Check the configuration for values the subscriber cannot run with.
    pub fn validate(&self) -> SubscriberResult<()> {
        let url = url::Url::parse(&self.self_url).map_err(|e| SubscriberError::Configuration {
            message: format!("self_url '{}' is not a valid URL: {}", self.self_url, e),
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SubscriberError::Configuration {
                message: format!("self_url must use http or https, got '{}'", url.scheme()),
            });
        }

        if url.query().is_some() || url.fragment().is_some() {
            return Err(SubscriberError::Configuration {
                message: "self_url must not carry a query or fragment".to_string(),
            });
        }

        if self.from.trim().is_empty() {
            return Err(SubscriberError::Configuration {
                message: "from must not be empty".to_string(),
            });
        }

        if self.request_timeout.is_zero() {
            return Err(SubscriberError::Configuration {
                message: "request_timeout must be greater than zero".to_string(),
            });
        }

        if self.renewal_interval.is_zero() {
            return Err(SubscriberError::Configuration {
                message: "renewal_interval must be greater than zero".to_string(),
            });
        }

        if self.renewal_grace < chrono::Duration::zero() {
            return Err(SubscriberError::Configuration {
                message: "renewal_grace must not be negative".to_string(),
            });
        }

        if self.renewal_grace > chrono::Duration::days(MAX_RENEWAL_GRACE_DAYS) {
            return Err(SubscriberError::Configuration {
                message: format!(
                    "renewal_grace must not exceed {} days",
                    MAX_RENEWAL_GRACE_DAYS
                ),
            });
        }

        if self.dedup_capacity == 0 {
            return Err(SubscriberError::Configuration {
                message: "dedup_capacity must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Subscriber
// ============================================================================

/// Handles of the renewal task while the subscriber is running.
struct RenewalTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// WebSub subscriber: subscription management plus callback processing.
///
/// Share it between the HTTP server and the application with an `Arc`.
pub struct Subscriber {
    config: SubscriberConfig,
    registry: Arc<SubscriptionRegistry>,
    hub_client: HubClient,
    discoverer: Arc<dyn HubDiscoverer>,
    callbacks: CallbackHandler,
    dispatcher: Dispatcher,
    renewal: Mutex<Option<RenewalTask>>,
}

impl Subscriber {
    /// Create an idle subscriber using `reqwest` for hub requests and feed
    /// discovery.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriberError::Configuration`] for an invalid
    /// configuration and [`SubscriberError::HttpClient`] if the HTTP client
    /// cannot be built.
    pub fn new(config: SubscriberConfig) -> SubscriberResult<Self> {
        config.validate()?;

        let transport = ReqwestTransport::new(config.request_timeout)?;
        let discoverer = FeedDiscoverer::new(config.request_timeout)?;

        Self::with_components(config, Arc::new(transport), Arc::new(discoverer))
    }

    /// Create an idle subscriber with custom transport and discovery.
    pub fn with_components(
        config: SubscriberConfig,
        transport: Arc<dyn HubTransport>,
        discoverer: Arc<dyn HubDiscoverer>,
    ) -> SubscriberResult<Self> {
        config.validate()?;

        let registry = Arc::new(SubscriptionRegistry::new());
        let hub_client = HubClient::new(transport, &config.self_url, config.from_header());
        let (sender, receiver) = delivery_channel();
        let callbacks = CallbackHandler::new(registry.clone(), config.dedup_capacity, sender);

        Ok(Self {
            config,
            registry,
            hub_client,
            discoverer,
            callbacks,
            dispatcher: Dispatcher::new(receiver),
            renewal: Mutex::new(None),
        })
    }

    /// Configuration this subscriber was built with.
    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    /// Callback URL registered with the hub for subscription `id`.
    pub fn callback_url(&self, id: SubscriptionId) -> String {
        self.hub_client.callback_url(id)
    }

    /// Register `handler` for updates on `topic` published through `hub`.
    ///
    /// Replaces any existing subscription for the topic. While running, the
    /// subscribe request is sent before returning; its failure is only
    /// logged and left to the renewal task.
    #[instrument(skip(self, secret, handler))]
    pub async fn subscribe(
        &self,
        hub: &str,
        topic: &str,
        secret: impl Into<HubSecret>,
        handler: Arc<dyn UpdateHandler>,
    ) -> SubscriptionId {
        let secret = secret.into();
        let subscription = self.registry.create(hub, topic, secret, handler).await;

        if self.is_running().await {
            let _ = self.hub_client.request_subscribe(&subscription).await;
        } else {
            info!(subscription_id = %subscription.id, "Subscription registered, pending start");
        }

        subscription.id
    }

    /// Drop interest in `topic`.
    ///
    /// The record is removed before the hub is contacted, so the hub's
    /// unsubscribe verification finds it absent. A failed unsubscribe request
    /// is not retried. Returns whether the topic was subscribed.
    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, topic: &str) -> bool {
        let subscription = match self.registry.remove(topic).await {
            Some(subscription) => subscription,
            None => {
                warn!("Cannot unsubscribe, topic is not subscribed");
                return false;
            }
        };

        if self.is_running().await {
            let _ = self.hub_client.request_unsubscribe(&subscription).await;
        }

        true
    }

    /// Find the hub advertised by the feed at `topic`.
    pub async fn discover(&self, topic: &str) -> SubscriberResult<String> {
        self.discoverer
            .discover(topic)
            .await
            .map_err(|source| SubscriberError::Discovery {
                topic: topic.to_string(),
                source,
            })
    }

    /// Discover the hub of `topic` and subscribe through it.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriberError::Discovery`] when no hub could be found;
    /// nothing is registered in that case.
    pub async fn discover_and_subscribe(
        &self,
        topic: &str,
        secret: impl Into<HubSecret>,
        handler: Arc<dyn UpdateHandler>,
    ) -> SubscriberResult<SubscriptionId> {
        let secret = secret.into();
        let hub = self.discover(topic).await?;
        Ok(self.subscribe(&hub, topic, secret, handler).await)
    }

    /// Start lease renewal. Does nothing if already running.
    ///
    /// The first renewal scan runs immediately and sends a subscribe request
    /// for every subscription that is not yet verified.
    pub async fn start(&self) {
        self.dispatcher.ensure_running();

        let mut renewal = self.renewal.lock().await;
        if renewal.is_some() {
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let scheduler = RenewalScheduler::new(
            self.registry.clone(),
            self.hub_client.clone(),
            self.config.renewal_interval,
            self.config.renewal_grace,
        );

        *renewal = Some(RenewalTask {
            shutdown,
            handle: tokio::spawn(scheduler.run(shutdown_rx)),
        });

        let subscriptions = self.registry.len().await;
        info!(
            self_url = %self.config.self_url,
            subscriptions,
            "Subscriber started"
        );
    }

    /// Stop lease renewal. Does nothing if idle.
    ///
    /// Waits for an in-flight renewal scan to finish without blocking
    /// concurrent `subscribe`/`unsubscribe` calls. Update dispatch continues.
    pub async fn stop(&self) {
        let task = match self.renewal.lock().await.take() {
            Some(task) => task,
            None => return,
        };

        let _ = task.shutdown.send(true);

        if let Err(e) = task.handle.await {
            error!(error = %e, "Renewal task ended abnormally");
        }

        info!("Subscriber stopped");
    }

    /// Whether lease renewal is running.
    pub async fn is_running(&self) -> bool {
        self.renewal.lock().await.is_some()
    }

    /// Process an inbound hub callback.
    pub async fn handle_callback(&self, request: &CallbackRequest) -> CallbackResponse {
        self.dispatcher.ensure_running();
        self.callbacks.handle(request).await
    }

    /// Whether a subscription exists for `topic`.
    pub async fn has_subscription(&self, topic: &str) -> bool {
        self.registry.contains(topic).await
    }

    /// Snapshot of all subscriptions, ordered by id.
    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.registry.list().await
    }

    /// Human-readable state, e.g. `2 subscription(s): [https://a https://b]`.
    pub async fn summary(&self) -> String {
        let topics: Vec<String> = self
            .registry
            .list()
            .await
            .into_iter()
            .map(|subscription| subscription.topic)
            .collect();

        format!("{} subscription(s): [{}]", topics.len(), topics.join(" "))
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "subscriber_tests.rs"]
mod tests;
