//! Configuration types for the HTTP service

use crate::errors::ConfigError;
use hubbub_core::SubscriberConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Subscriber engine settings
    pub subscriber: SubscriberSettings,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Topics subscribed at startup
    pub subscriptions: Vec<SubscriptionConfig>,
}

impl ServiceConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.subscriber.validate()?;

        for subscription in &self.subscriptions {
            subscription.validate()?;
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl ServerConfig {
    /// `host:port` string used for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "server.host".to_string(),
            });
        }
        Ok(())
    }
}

/// Settings mapped onto [`SubscriberConfig`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberSettings {
    /// Public base URL under which this service is reachable by hubs
    pub self_url: String,

    /// Application name sent in the `From` header
    pub from: String,

    /// Timeout for outbound hub and feed requests
    pub request_timeout_seconds: u64,

    /// Seconds between lease renewal scans
    pub renewal_interval_seconds: u64,

    /// Seconds past expiry before a lease is renewed
    pub renewal_grace_seconds: u64,

    /// Number of recent update bodies remembered for deduplication
    pub dedup_capacity: usize,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        let defaults = SubscriberConfig::default();
        Self {
            self_url: defaults.self_url,
            from: defaults.from,
            request_timeout_seconds: defaults.request_timeout.as_secs(),
            renewal_interval_seconds: defaults.renewal_interval.as_secs(),
            renewal_grace_seconds: defaults.renewal_grace.num_seconds().max(0) as u64,
            dedup_capacity: defaults.dedup_capacity,
        }
    }
}

impl SubscriberSettings {
    /// Build the engine configuration.
    pub fn to_subscriber_config(&self) -> SubscriberConfig {
        let grace = i64::try_from(self.renewal_grace_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX);

        SubscriberConfig::new(self.self_url.clone(), self.from.clone())
            .with_request_timeout(Duration::from_secs(self.request_timeout_seconds))
            .with_renewal_interval(Duration::from_secs(self.renewal_interval_seconds))
            .with_renewal_grace(grace)
            .with_dedup_capacity(self.dedup_capacity)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.self_url.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "subscriber.self_url".to_string(),
            });
        }

        self.to_subscriber_config()
            .validate()
            .map_err(|e| ConfigError::Invalid {
                message: e.to_string(),
            })
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// One topic to subscribe to at startup.
///
/// Without a `hub` the hub is discovered from the topic's feed.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionConfig {
    /// Topic URL
    pub topic: String,

    /// Hub endpoint; discovered when absent
    #[serde(default)]
    pub hub: Option<String>,

    /// Shared secret for signed deliveries
    #[serde(default)]
    pub secret: Option<String>,
}

impl SubscriptionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "subscriptions[].topic".to_string(),
            });
        }

        if let Some(hub) = &self.hub {
            if hub.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    message: format!("Empty hub for topic '{}'", self.topic),
                });
            }
        }

        Ok(())
    }
}

// Security: never print the secret
impl fmt::Debug for SubscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionConfig")
            .field("topic", &self.topic)
            .field("hub", &self.hub)
            .field("secret", &self.secret.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
