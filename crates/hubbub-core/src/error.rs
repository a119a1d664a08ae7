//! Error types for subscriber operations.
//!
//! Outbound request failures are classified so callers (and the renewal loop)
//! can tell transient hub trouble from permanent misconfiguration. Inbound
//! protocol violations are not errors at this level; they are expressed as
//! [`CallbackResponse::BadRequest`](crate::CallbackResponse) values.

use thiserror::Error;

/// Failures of an outbound subscribe or unsubscribe request.
///
/// These never surface to the caller of `subscribe`/`unsubscribe`; they are
/// logged and the subscription stays pending until the next renewal scan.
#[derive(Debug, Error)]
pub enum HubRequestError {
    /// The request could not be delivered (connection, DNS, TLS, timeout).
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The hub answered with something other than 202 Accepted.
    #[error("Hub rejected request with status {status}")]
    UnexpectedStatus { status: u16 },

    /// The request could not be constructed (for example an invalid hub URL).
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

impl HubRequestError {
    /// Check if this error may succeed if the same request is sent again.
    ///
    /// Transport failures, server errors (5xx) and rate limiting (429) are
    /// transient; client errors and malformed requests are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::UnexpectedStatus { status } => *status >= 500 || *status == 429,
            Self::InvalidRequest { .. } => false,
        }
    }
}

/// Failures while discovering the hub of a topic from its feed document.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The feed could not be fetched.
    #[error("Unable to fetch feed: {message}")]
    FetchFailed { message: String },

    /// The feed request returned a non-200 status.
    #[error("Feed request failed, status code {status}")]
    UnexpectedStatus { status: u16 },

    /// The feed body could not be read.
    #[error("Error reading feed response: {message}")]
    ReadFailed { message: String },

    /// The feed body is not well-formed XML.
    #[error("Unable to parse xml: {message}")]
    ParseFailed { message: String },

    /// The feed does not advertise a hub.
    #[error("No hub found in feed")]
    NoHubFound,
}

/// Failures while parsing or verifying an `x-hub-signature` header.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    /// Header missing or not of the form `<alg>=<hexdigest>`.
    #[error("Signature not found or invalid")]
    MalformedHeader,

    /// Algorithm token is not one of sha1, sha256, sha384, sha512.
    #[error("Unsupported signature algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    /// HMAC instance could not be created.
    #[error("HMAC computation failed: {message}")]
    Hmac { message: String },
}

/// Errors surfaced synchronously by the [`Subscriber`](crate::Subscriber) facade.
#[derive(Debug, Error)]
pub enum SubscriberError {
    /// Configuration is invalid.
    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    /// The outbound HTTP client could not be built.
    #[error("Failed to build HTTP client: {message}")]
    HttpClient { message: String },

    /// Hub discovery failed for the topic.
    #[error("Unable to find hub for {topic}: {source}")]
    Discovery {
        topic: String,
        #[source]
        source: DiscoveryError,
    },
}
