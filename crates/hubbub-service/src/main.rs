//! # Hubbub Service
//!
//! Binary entry point for the Hubbub subscriber service.
//!
//! This executable:
//! - Parses command-line flags
//! - Loads configuration from files and environment
//! - Initializes logging
//! - Registers the configured subscriptions
//! - Serves the callback endpoint until SIGINT/SIGTERM

use clap::Parser;
use hubbub_api::{register_subscriptions, start_server, ServiceConfig, ServiceError};
use hubbub_core::Subscriber;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Prefix of environment variables overriding configuration values,
/// e.g. `HUBBUB__SERVER__PORT=9090`.
const ENV_PREFIX: &str = "HUBBUB";

#[derive(Debug, Parser)]
#[command(name = "hubbub-service")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "WebSub subscriber service")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "HUBBUB_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Port to bind the HTTP server, overriding the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Logging level, overriding the configuration
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let loaded = load_config(&cli);

    // Logging is needed to report configuration failures, so fall back to the
    // command line when the configuration cannot be read.
    let (level, json) = match &loaded {
        Ok(config) => (config.logging.level.clone(), config.logging.json_format),
        Err(_) => (
            cli.log_level.clone().unwrap_or_else(|| "info".to_string()),
            cli.json_logs,
        ),
    };
    init_tracing(&level, json);

    info!("Starting Hubbub Service");

    let service_config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!(
                error = %e,
                "Could not load service configuration; aborting. \
                 Fix the configuration and restart."
            );
            std::process::exit(3);
        }
    };

    if let Err(e) = service_config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(3);
    }

    let subscriber = match Subscriber::new(service_config.subscriber.to_subscriber_config()) {
        Ok(subscriber) => Arc::new(subscriber),
        Err(e) => {
            error!(error = %e, "Failed to create subscriber; aborting");
            std::process::exit(3);
        }
    };

    register_subscriptions(&subscriber, &service_config.subscriptions).await;
    info!(summary = %subscriber.summary().await, "Subscriber ready");

    info!(
        host = %service_config.server.host,
        port = service_config.server.port,
        self_url = %service_config.subscriber.self_url,
        "Starting HTTP server"
    );

    if let Err(e) = start_server(service_config, subscriber).await {
        error!("Failed to start server: {}", e);

        let exit_code = match e {
            ServiceError::BindFailed { .. } => 1,
            ServiceError::ServerFailed { .. } => 2,
            ServiceError::Configuration(_) | ServiceError::Subscriber(_) => 3,
        };

        std::process::exit(exit_code);
    }

    Ok(())
}

// ============================================================================
// Private helpers
// ============================================================================

/// Load the layered service configuration.
///
/// Sources, later overriding earlier:
///  1. `/etc/hubbub/service.yaml`
///  2. `./config/service.yaml`
///  3. The file given by `--config` / `HUBBUB_CONFIG_FILE` (must exist)
///  4. `HUBBUB__*` environment variables
///  5. Command-line flags
fn load_config(cli: &Cli) -> Result<ServiceConfig, config::ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(
            config::File::with_name("/etc/hubbub/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        )
        .add_source(
            config::File::with_name("config/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        );

    if let Some(path) = &cli.config {
        builder = builder.add_source(
            config::File::from(path.as_path())
                .required(true)
                .format(config::FileFormat::Yaml),
        );
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    if let Some(port) = cli.port {
        builder = builder.set_override("server.port", i64::from(port))?;
    }
    if let Some(level) = &cli.log_level {
        builder = builder.set_override("logging.level", level.as_str())?;
    }
    if cli.json_logs {
        builder = builder.set_override("logging.json_format", true)?;
    }

    builder.build()?.try_deserialize()
}

fn default_filter(level: &str) -> String {
    format!(
        "hubbub_service={level},hubbub_api={level},hubbub_core={level},tower_http=debug",
        level = level
    )
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
