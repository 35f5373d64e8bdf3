//! wifi-provisioner daemon
//!
//! Brings the radio up in client or setup-AP mode and supervises it until
//! SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wp_core::config::{self, ProvisionerConfig};
use wp_orchestrator::connection::HttpProbe;
use wp_orchestrator::provisioner::tunnel_providers;
use wp_orchestrator::{Provisioner, StateStore};
use wp_radio::NmcliDriver;

#[derive(Parser)]
#[command(name = "wp-orchestrator")]
#[command(about = "wifi-provisioner connection orchestrator daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "WP_CONFIG")]
    config: Option<PathBuf>,

    /// State snapshot path (overrides config)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("wifi-provisioner starting...");

    let mut config: ProvisionerConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                ProvisionerConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            ProvisionerConfig::default()
        }
    };

    if let Some(state_file) = args.state_file {
        config.state_file = Some(state_file);
    }
    config.validate().context("Invalid configuration")?;

    let store = Arc::new(match &config.state_file {
        Some(path) => {
            tracing::info!("Persisting state to {:?}", path);
            StateStore::open(path.clone()).await
        }
        None => StateStore::in_memory(),
    });

    let driver = Arc::new(NmcliDriver::new(&config.radio));
    let probe = Arc::new(HttpProbe::new(&config.probe).context("Failed to build probe HTTP client")?);
    let providers = tunnel_providers(&config.tunnel).context("Invalid tunnel configuration")?;

    let provisioner = Provisioner::new(config, driver, store, probe, providers);

    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    provisioner.run(cancel).await;

    tracing::info!("wifi-provisioner stopped");
    Ok(())
}
