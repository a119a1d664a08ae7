//! # Hubbub Core
//!
//! Subscriber-side engine for the WebSub (formerly PubSubHubbub) publish/subscribe
//! webhook protocol.
//!
//! A subscriber registers interest in a topic with a hub, the hub verifies the
//! intent by calling back, and afterwards delivers update notifications to the
//! callback URL. Leases granted by the hub have to be renewed before they lapse.
//!
//! This crate contains the protocol logic and nothing that binds a socket:
//! - [`registry`] - in-memory topic → subscription records
//! - [`hub_client`] - outbound subscribe/unsubscribe requests
//! - [`renewal`] - periodic lease renewal
//! - [`callback`] - the inbound callback state machine
//! - [`signature`] / [`secret`] - keyed-hash authenticity checks
//! - [`dedup`] - suppression of redelivered notifications
//! - [`dispatch`] - detached execution of application handlers
//! - [`discovery`] - finding a topic's hub from its feed
//! - [`subscriber`] - the [`Subscriber`] facade composing all of the above
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hubbub_core::{handler_fn, Subscriber, SubscriberConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SubscriberConfig::new("https://subscriber.example.com", "my-app");
//! let subscriber = Subscriber::new(config)?;
//!
//! subscriber
//!     .subscribe(
//!         "https://hub.example.com/",
//!         "https://blog.example.com/feed.atom",
//!         "",
//!         handler_fn(|content_type, body| {
//!             println!("{} bytes of {}", body.len(), content_type);
//!         }),
//!     )
//!     .await;
//!
//! // Once the HTTP server routing /push-callback/ is up:
//! subscriber.start().await;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod callback;
pub mod dedup;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod hub_client;
pub mod registry;
pub mod renewal;
pub mod secret;
pub mod signature;
pub mod subscriber;

pub use callback::{CallbackHandler, CallbackMode, CallbackRequest, CallbackResponse};
pub use dedup::{DedupCache, MessageDigest};
pub use discovery::{find_hub_link, FeedDiscoverer, HubDiscoverer};
pub use dispatch::{handler_fn, Delivery, UpdateHandler};
pub use error::{DiscoveryError, HubRequestError, SignatureError, SubscriberError};
pub use hub_client::{HubClient, HubMode, HubTransport, ReqwestTransport};
pub use registry::{Subscription, SubscriptionRegistry};
pub use renewal::{needs_renewal, RenewalScheduler};
pub use secret::{derive_secret_key, HubSecret};
pub use signature::{HubSignature, SignatureAlgorithm};
pub use subscriber::{Subscriber, SubscriberConfig};

/// Path prefix under which all hub callbacks are routed.
pub const CALLBACK_PATH_PREFIX: &str = "/push-callback/";

/// Standard result type for subscriber operations
pub type SubscriberResult<T> = Result<T, SubscriberError>;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Process-unique identifier of a subscription.
///
/// Embedded as the final segment of the callback URL so that update
/// notifications can be routed back to their subscription without a topic
/// parameter. Identifiers are handed out by a [`SubscriptionRegistry`] and
/// never reused while it is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Wrap a raw identifier value
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw identifier value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Parse the identifier from a callback path of the form
    /// `/push-callback/<id>`.
    ///
    /// Any other shape (extra segments, missing id, non-numeric id) yields `None`.
    pub fn from_callback_path(path: &str) -> Option<Self> {
        let rest = path.strip_prefix(CALLBACK_PATH_PREFIX)?;
        if rest.is_empty() || rest.contains('/') {
            return None;
        }
        rest.parse().ok()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubscriptionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self)
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
