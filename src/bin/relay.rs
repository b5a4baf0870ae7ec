//! Audio Relay Application
//!
//! Relays one multicast Livewire+/AES67 stream to a PCM or Opus RTP output.
//!
//! Usage: `relay [config.json]`. Without an argument the per-user config file
//! is used if present, otherwise the built-in defaults.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio_relay::{pipeline, PipelineState, RelayConfig};

const CONFIG_FILE: &str = "relay.json";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Audio Relay");

    let config = load_config()?;
    tracing::info!(
        "Input: {} {}:{}, output: {:?} {}:{}",
        config.input.format.name(),
        config.input.multicast_address,
        config.input.port,
        config.output.encoding,
        config.output.destination_address,
        config.output.destination_port
    );

    let handle = pipeline::start(config)
        .await
        .context("pipeline failed to start")?;

    tracing::info!("Relay running - press Ctrl+C to stop");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            tracing::info!("Shutdown requested");
        }
        state = handle.wait() => {
            if state == PipelineState::Faulted {
                tracing::error!("Relay faulted: {}", handle.fault().unwrap_or_default());
            }
        }
    }

    let stats = handle.stats();
    handle.stop().await.context("relay stopped on a fault")?;

    tracing::info!(
        "Relay stopped: {} packets in, {} packets out",
        stats.packets_received,
        stats.packets_sent
    );
    Ok(())
}

fn load_config() -> Result<RelayConfig> {
    if let Some(path) = std::env::args().nth(1) {
        return RelayConfig::load(&path).with_context(|| format!("loading {}", path));
    }

    if let Some(path) = user_config_path().filter(|p| p.exists()) {
        tracing::info!("Using config {}", path.display());
        return RelayConfig::load(&path).with_context(|| format!("loading {}", path.display()));
    }

    tracing::info!("No config file given, using defaults");
    let config = RelayConfig::default();
    config.validate()?;
    Ok(config)
}

fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "audio-relay").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}
