//! DNS detector - Entry point.
//!
//! Captures DNS responses on the configured interface, filters the queried
//! domains through the block and allow lists, and publishes the rest.

use std::borrow::Cow;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dns_detector::config::{Config, SinkConfig};
use dns_detector::lists::FileLoader;
use dns_detector::network::PacketSniffer;
use dns_detector::pipeline::Pipeline;
use dns_detector::publisher::{FilePublisher, LogPublisher, MessagePublisher};

fn build_publisher(sink: &SinkConfig) -> Result<Box<dyn MessagePublisher>> {
    Ok(match sink {
        SinkConfig::Log => Box::new(LogPublisher),
        SinkConfig::File(path) => Box::new(
            FilePublisher::open(path)
                .with_context(|| format!("Failed to open result file {}", path.display()))?,
        ),
    })
}

async fn run() -> Result<()> {
    let config_path = std::env::var("CONFIG_PATH")
        .map(Cow::Owned)
        .unwrap_or(Cow::Borrowed("config.toml"));
    let config = Config::load(config_path.as_ref()).context("Failed to load configuration")?;

    // Initialize metrics (must be done early, before any metrics are recorded)
    dns_detector::metrics::init(&config.metrics).context("Failed to initialize metrics")?;
    if config.metrics.enabled {
        info!("Metrics enabled on {}", config.metrics.listen);
    }

    info!("Starting DNS detector on interface {}", config.interface);

    let lists = FileLoader::load_lists(&config.lists)
        .await
        .context("Failed to load domain lists")?;
    let publisher = build_publisher(&config.publisher.sink)?;

    let sniffer = PacketSniffer::open(&config.interface, config.capture_buffer_size)
        .with_context(|| format!("Failed to open capture on {}", config.interface))?;

    let handle = Pipeline::from_config(&config)
        .spawn(sniffer, lists, publisher)
        .context("Failed to start pipeline")?;
    let token = handle.token().clone();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down...");
        }
        () = token.cancelled() => {
            error!("Pipeline stopped unexpectedly");
        }
    }

    handle.shutdown();
    tokio::task::spawn_blocking(move || handle.join())
        .await
        .context("Failed to join pipeline")?
        .context("Pipeline failed")?;

    info!("Shutdown complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    run().await
}
