//! # Hubbub HTTP Service
//!
//! HTTP surface for a WebSub subscriber built on [`hubbub_core`].
//!
//! This crate provides:
//! - The `/push-callback/` endpoint that hubs call for verification and
//!   content distribution
//! - A liveness responder answering every other path with `hubbub ok`
//! - Service configuration and startup subscriptions
//! - Server startup with graceful shutdown that also stops the subscriber

pub mod config;
pub mod errors;
pub mod responses;

pub use config::{
    LoggingConfig, ServerConfig, ServiceConfig, SubscriberSettings, SubscriptionConfig,
};
pub use errors::{ConfigError, ServiceError};
pub use responses::{CallbackReply, LIVENESS_BODY, PLAIN_TEXT};

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::IntoResponse,
    routing::any,
    Router,
};
use bytes::Bytes;
use hubbub_core::{handler_fn, CallbackRequest, Subscriber, UpdateHandler};
use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: ServiceConfig,

    /// Subscriber answering hub callbacks
    pub subscriber: Arc<Subscriber>,
}

impl AppState {
    pub fn new(config: ServiceConfig, subscriber: Arc<Subscriber>) -> Self {
        Self { config, subscriber }
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Callback routes only, for merging into an application's own router.
///
/// Must be merged at the root: callback ids are parsed from the full path.
pub fn callback_routes() -> Router<AppState> {
    Router::new()
        .route("/push-callback/", any(handle_callback))
        .route("/push-callback/{*rest}", any(handle_callback))
}

/// Create HTTP router with the callback endpoint and the liveness fallback
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(callback_routes())
        .fallback(handle_liveness)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(state)
}

/// Start HTTP server on the configured address.
///
/// Serves until SIGINT or SIGTERM.
pub async fn start_server(
    config: ServiceConfig,
    subscriber: Arc<Subscriber>,
) -> Result<(), ServiceError> {
    let address = config.server.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: address.clone(),
            message: e.to_string(),
        })?;

    info!("Starting HTTP server on {}", address);

    let shutdown_timeout = config.server.shutdown_timeout();
    let state = AppState::new(config, subscriber);

    serve(listener, state, shutdown_signal(shutdown_timeout)).await
}

/// Serve on an already bound listener until `shutdown` completes.
///
/// The subscriber is started in the background once the listener is ready,
/// so the hub's verification callbacks can be answered, and is stopped after
/// the server has drained.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<(), ServiceError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let subscriber = state.subscriber.clone();
    let shutdown_timeout = state.config.server.shutdown_timeout();
    let app = create_router(state);

    // Initial subscribe requests go out once the listener accepts connections.
    let starter = subscriber.clone();
    tokio::spawn(async move { starter.start().await });

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        });

    if tokio::time::timeout(shutdown_timeout, subscriber.stop())
        .await
        .is_err()
    {
        warn!(
            timeout_secs = shutdown_timeout.as_secs(),
            "Subscriber did not stop within shutdown timeout"
        );
    }

    info!("HTTP server shutdown complete");
    result
}

async fn shutdown_signal(shutdown_timeout: Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown with {}s timeout", shutdown_timeout.as_secs());
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown with {}s timeout", shutdown_timeout.as_secs());
        },
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Handle a hub callback (verification or content distribution).
///
/// The body is read completely before processing; update handlers run after
/// the response has been produced.
#[instrument(skip(state, headers, body), fields(path = %uri.path()))]
pub async fn handle_callback(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> CallbackReply {
    let header_map: HashMap<String, String> = headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_lowercase(),
                v.to_str().unwrap_or("").to_string(),
            )
        })
        .collect();

    let query = CallbackRequest::parse_query(uri.query().unwrap_or(""));
    let request = CallbackRequest::new(uri.path(), query, header_map, body);

    CallbackReply(state.subscriber.handle_callback(&request).await)
}

/// Answer any other path so load balancers and humans see a live service.
#[instrument(skip_all, fields(path = %uri.path()))]
async fn handle_liveness(uri: Uri) -> impl IntoResponse {
    info!("Liveness request");
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PLAIN_TEXT)],
        LIVENESS_BODY,
    )
}

// ============================================================================
// Startup Subscriptions
// ============================================================================

/// Update handler that logs each notification for `topic`.
pub fn log_update_handler(topic: impl Into<String>) -> Arc<dyn UpdateHandler> {
    let topic = topic.into();
    handler_fn(move |content_type, body| {
        info!(
            topic = %topic,
            content_type = %content_type,
            bytes = body.len(),
            "Update received"
        );
    })
}

/// Subscribe to every configured topic, logging each update.
///
/// Topics without a hub are discovered first; a failed discovery is logged
/// and the topic skipped. Returns the number of topics registered.
pub async fn register_subscriptions(
    subscriber: &Subscriber,
    subscriptions: &[SubscriptionConfig],
) -> usize {
    let mut registered = 0;

    for subscription in subscriptions {
        let secret = subscription.secret.clone().unwrap_or_default();
        let handler = log_update_handler(subscription.topic.clone());

        match &subscription.hub {
            Some(hub) => {
                subscriber
                    .subscribe(hub, &subscription.topic, secret, handler)
                    .await;
                registered += 1;
            }
            None => {
                match subscriber
                    .discover_and_subscribe(&subscription.topic, secret, handler)
                    .await
                {
                    Ok(_) => registered += 1,
                    Err(e) => {
                        warn!(topic = %subscription.topic, error = %e, "Skipping subscription");
                    }
                }
            }
        }
    }

    info!(
        registered,
        configured = subscriptions.len(),
        "Startup subscriptions registered"
    );
    registered
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
