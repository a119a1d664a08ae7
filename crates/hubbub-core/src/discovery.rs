//! Hub discovery from RSS and Atom feeds.
//!
//! Publishers advertise their hub with a `<link rel="hub" href="..."/>`
//! element, either directly under an Atom `<feed>` or inside an RSS
//! `<channel>`. Feed-level links win over channel-level ones; within each
//! group the first match wins.

use crate::error::{DiscoveryError, SubscriberError};
use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::time::Duration;
use tracing::{debug, instrument};

/// Locate the hub advertised by a feed document.
///
/// # Errors
///
/// Returns [`DiscoveryError::ParseFailed`] for input that is not well-formed
/// XML and [`DiscoveryError::NoHubFound`] when no `rel="hub"` link exists.
pub fn find_hub_link(feed: &[u8]) -> Result<String, DiscoveryError> {
    let mut reader = Reader::from_reader(feed);
    reader.trim_text(true);

    // Local names of the currently open elements, outermost first.
    let mut open: Vec<Vec<u8>> = Vec::new();
    let mut saw_root = false;
    let mut feed_hub: Option<String> = None;
    let mut channel_hub: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                saw_root = true;
                record_hub(e, &open, &mut feed_hub, &mut channel_hub)?;
                open.push(e.local_name().as_ref().to_vec());
            }
            Ok(Event::Empty(ref e)) => {
                saw_root = true;
                record_hub(e, &open, &mut feed_hub, &mut channel_hub)?;
            }
            Ok(Event::End(_)) => {
                open.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DiscoveryError::ParseFailed {
                    message: e.to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(DiscoveryError::ParseFailed {
            message: "document has no root element".to_string(),
        });
    }
    if !open.is_empty() {
        return Err(DiscoveryError::ParseFailed {
            message: "unexpected end of document".to_string(),
        });
    }

    feed_hub.or(channel_hub).ok_or(DiscoveryError::NoHubFound)
}

fn record_hub(
    element: &BytesStart<'_>,
    open: &[Vec<u8>],
    feed_hub: &mut Option<String>,
    channel_hub: &mut Option<String>,
) -> Result<(), DiscoveryError> {
    if element.local_name().as_ref() != b"link" {
        return Ok(());
    }

    let slot = match open {
        [_root] => feed_hub,
        [_root, channel] if channel.as_slice() == b"channel" => channel_hub,
        _ => return Ok(()),
    };

    if slot.is_some() {
        return Ok(());
    }

    let mut rel = None;
    let mut href = None;
    for attribute in element.attributes() {
        let attribute = attribute.map_err(|e| DiscoveryError::ParseFailed {
            message: e.to_string(),
        })?;
        let value = attribute
            .unescape_value()
            .map_err(|e| DiscoveryError::ParseFailed {
                message: e.to_string(),
            })?
            .into_owned();

        match attribute.key.local_name().as_ref() {
            b"rel" => rel = Some(value),
            b"href" => href = Some(value),
            _ => {}
        }
    }

    if rel.as_deref() == Some("hub") {
        *slot = Some(href.unwrap_or_default());
    }

    Ok(())
}

/// Source of hub URLs for topics.
#[async_trait]
pub trait HubDiscoverer: Send + Sync {
    /// Find the hub that `topic` publishes to.
    async fn discover(&self, topic: &str) -> Result<String, DiscoveryError>;
}

/// [`HubDiscoverer`] that fetches the topic URL and reads its feed.
#[derive(Debug, Clone)]
pub struct FeedDiscoverer {
    client: reqwest::Client,
}

impl FeedDiscoverer {
    /// Build a discoverer whose fetches give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, SubscriberError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SubscriberError::HttpClient {
                message: e.to_string(),
            })?;

        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HubDiscoverer for FeedDiscoverer {
    #[instrument(skip(self))]
    async fn discover(&self, topic: &str) -> Result<String, DiscoveryError> {
        let response = self
            .client
            .get(topic)
            .send()
            .await
            .map_err(|e| DiscoveryError::FetchFailed {
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(DiscoveryError::UnexpectedStatus { status });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DiscoveryError::ReadFailed {
                message: e.to_string(),
            })?;

        let hub = find_hub_link(&body)?;
        debug!(hub = %hub, "Discovered hub");
        Ok(hub)
    }
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
