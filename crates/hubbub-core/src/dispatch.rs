//! Detached execution of application update handlers.
//!
//! The callback handler never runs application code itself. Accepted,
//! deduplicated notifications are queued as [`Delivery`] messages on a
//! per-subscriber channel; a dispatcher task drains the channel and runs each
//! handler invocation as its own task. A slow or failing handler therefore
//! cannot delay the HTTP response to the hub, and handler calls are not
//! serialised per subscription. The dispatcher lives as long as its
//! subscriber; starting and stopping lease renewal does not affect it.

use crate::SubscriptionId;
use async_trait::async_trait;
use bytes::Bytes;
use std::error::Error;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Application-provided handler for update notifications.
///
/// Called once per unique notification with the request's `Content-Type`
/// and raw body. Errors are logged and otherwise ignored; the hub has already
/// received its response by the time the handler runs.
///
/// # Examples
///
/// ```rust
/// use hubbub_core::UpdateHandler;
/// use async_trait::async_trait;
/// use bytes::Bytes;
///
/// struct PrintHandler;
///
/// #[async_trait]
/// impl UpdateHandler for PrintHandler {
///     async fn handle_update(
///         &self,
///         content_type: &str,
///         body: Bytes,
///     ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
///         println!("{}: {} bytes", content_type, body.len());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    /// Handle one update notification.
    async fn handle_update(
        &self,
        content_type: &str,
        body: Bytes,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// [`UpdateHandler`] backed by a plain closure.
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> UpdateHandler for FnHandler<F>
where
    F: Fn(&str, Bytes) + Send + Sync,
{
    async fn handle_update(
        &self,
        content_type: &str,
        body: Bytes,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        (self.f)(content_type, body);
        Ok(())
    }
}

/// Wrap a closure taking `(content_type, body)` as a shareable handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn UpdateHandler>
where
    F: Fn(&str, Bytes) + Send + Sync + 'static,
{
    Arc::new(FnHandler { f })
}

/// One accepted notification waiting for its handler.
#[derive(Clone)]
pub struct Delivery {
    pub subscription_id: SubscriptionId,
    pub topic: String,
    pub content_type: String,
    pub body: Bytes,
    pub handler: Arc<dyn UpdateHandler>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("subscription_id", &self.subscription_id)
            .field("topic", &self.topic)
            .field("content_type", &self.content_type)
            .field("body_len", &self.body.len())
            .finish()
    }
}

pub type DeliverySender = mpsc::UnboundedSender<Delivery>;
pub type DeliveryReceiver = mpsc::UnboundedReceiver<Delivery>;

/// Create the per-subscriber delivery queue.
pub fn delivery_channel() -> (DeliverySender, DeliveryReceiver) {
    mpsc::unbounded_channel()
}

/// Drain `deliveries` until every sender is gone.
///
/// Each delivery runs on its own task.
pub async fn run_dispatcher(mut deliveries: DeliveryReceiver) {
    info!("Update dispatcher started");

    while let Some(delivery) = deliveries.recv().await {
        tokio::spawn(execute(delivery));
    }

    info!("Update dispatcher stopped");
}

/// Owner of a delivery queue's drain task.
///
/// The task is spawned on first use and lives as long as the queue's
/// senders, independent of whether renewal is running.
pub struct Dispatcher {
    pending: StdMutex<Option<DeliveryReceiver>>,
}

impl Dispatcher {
    /// Take ownership of the receiving end of a delivery queue.
    pub fn new(deliveries: DeliveryReceiver) -> Self {
        Self {
            pending: StdMutex::new(Some(deliveries)),
        }
    }

    /// Spawn the drain task unless it is already running.
    ///
    /// Must be called from within a Tokio runtime. Returns whether the task
    /// was spawned by this call.
    pub fn ensure_running(&self) -> bool {
        let receiver = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match receiver {
            Some(receiver) => {
                tokio::spawn(run_dispatcher(receiver));
                true
            }
            None => false,
        }
    }

    /// Whether the drain task has been spawned.
    pub fn is_running(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("running", &self.is_running())
            .finish()
    }
}

async fn execute(delivery: Delivery) {
    let Delivery {
        subscription_id,
        topic,
        content_type,
        body,
        handler,
    } = delivery;

    if let Err(e) = handler.handle_update(&content_type, body).await {
        error!(
            subscription_id = %subscription_id,
            topic = %topic,
            error = %e,
            "Update handler failed"
        );
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
