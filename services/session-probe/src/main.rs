//! Session probe
//!
//! Command-line driver for the calendar backend session:
//! 1. Loads configuration and the credential file
//! 2. Runs one command through the authenticated client
//! 3. Logs session events published along the way
//! 4. Prints a JSON report (and optionally a metrics snapshot) to stdout
//!
//! Logs go to stderr. Exit status is non-zero when the command's outcome
//! was not a success.

mod cli;
mod config;
mod error;
mod metrics;
mod probe;

use std::sync::Arc;

use anyhow::{Context, Result};
use backend_client::{AuthenticatedClient, EventBus};
use clap::Parser;
use session_auth::FileTokenStore;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    // Install before the client emits anything
    let prometheus = if cli.metrics {
        Some(metrics::install_recorder()?)
    } else {
        None
    };

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.backend.base_url,
        timeout_secs = config.backend.timeout_secs,
        credentials = %config.tokens.credentials_path.display(),
        "configuration loaded"
    );

    let store = FileTokenStore::load(config.tokens.credentials_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load credentials from {}",
                config.tokens.credentials_path.display()
            )
        })?;

    let events = EventBus::new(config.events.capacity);
    let mut rx = events.subscribe();
    let client = AuthenticatedClient::new(config.client_config(), Arc::new(store), events)
        .context("failed to build backend client")?;

    let command = cli.command.name();
    let result = probe::run(&client, cli.command).await;
    probe::log_events(&mut rx);

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            metrics::record_command(command, "error");
            print_metrics(prometheus.as_ref());
            return Err(e).with_context(|| format!("{command} failed"));
        }
    };
    metrics::record_command(command, report.result);

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to encode report")?
    );
    print_metrics(prometheus.as_ref());

    if !report.ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Initialize tracing with LOG_LEVEL / RUST_LOG support, writing to stderr.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

fn print_metrics(handle: Option<&metrics_exporter_prometheus::PrometheusHandle>) {
    if let Some(handle) = handle {
        print!("{}", handle.render());
    }
}
