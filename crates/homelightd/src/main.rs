use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use homelightd::api;
use homelightd::bridge::HueAdapter;
use homelightd::bridge::HueClient;
use homelightd::bridge::StateStore;
use homelightd::Config;
use homelightd::IntegrationContext;
use homelightd::Integrations;
use homelightd::LightsService;
use homelightd::Mode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Home lighting daemon: REST control of a Hue bridge plus HomeKit export
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "homelightd.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.filter())
        .init();

    tracing::info!("homelightd starting");
    tracing::info!("Loaded config from: {}", cli.config.display());
    if config.system.mode == Mode::Development {
        tracing::info!("Running in development mode, lights are left alone on connect");
    }

    let store = StateStore::load(&config.bridge.state_file)?;
    let client = HueClient::new(&config.bridge)?;
    let adapter = HueAdapter::new(client, store, config.system.mode != Mode::Development);
    let lights = Arc::new(LightsService::new(Arc::new(adapter)));

    // Bind first so a busy port fails startup instead of going unnoticed
    let listener = api::bind(&config.api).await?;

    let mut integrations = Integrations::from_config(&IntegrationContext {
        config: &config,
        lights: lights.clone(),
    })?;
    integrations.setup().await;
    tracing::info!("{} integration(s) running", integrations.len());

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let api_config = config.api.clone();
    let mut server =
        tokio::spawn(async move { api::serve(listener, &api_config, lights, shutdown_rx).await });

    tracing::info!("Press Ctrl+C to exit");
    let server_result = tokio::select! {
        result = &mut server => {
            tracing::error!("HTTP API server stopped unexpectedly");
            Some(result)
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => tracing::info!("Received shutdown signal"),
                Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
            }
            None
        }
    };

    integrations.shutdown().await;
    match server_result {
        Some(result) => result??,
        None => {
            let _ = shutdown_tx.send(());
            server.await??;
        }
    }

    tracing::info!("homelightd shutdown complete");
    Ok(())
}
