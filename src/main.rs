use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

use cf_metrics_agent::config::{AgentConfig, LogLevel};
use cf_metrics_agent::connection::jolokia::{JolokiaConfig, JolokiaConnector};
use cf_metrics_agent::runner::{Runner, RunnerHandle};
use cf_metrics_agent::sink::{SignalFxConfig, SignalFxSink};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "cf-metrics-agent", version, about = "Forward Cloud Foundry metrics to SignalFx")]
struct Args {
    /// Path to the TOML configuration file; without it only the environment is read
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let origin = args
        .config
        .as_ref()
        .map_or_else(|| "environment".to_string(), |path| path.display().to_string());
    let loaded = match &args.config {
        Some(path) => AgentConfig::load(path),
        None => AgentConfig::from_env(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            cf_metrics_agent::init_logging(LogLevel::Error).ok();
            error!("Failed to load configuration: {}", e);
            return Err(e).context(format!("Loading configuration from {}", origin));
        }
    };

    cf_metrics_agent::init_logging(args.log_level.unwrap_or(config.log_level))?;
    info!(
        "cf-metrics-agent {} starting with configuration from {}",
        cf_metrics_agent::VERSION,
        origin
    );

    let mut connector = JolokiaConnector::new(
        JolokiaConfig::new(&config.jmx.url)
            .credentials(&config.jmx.username, &config.jmx.password),
    );
    if let Some(tls) = config
        .jmx
        .tls_connector()
        .context("Loading bridge certificate")?
    {
        connector = connector.with_tls(tls);
    }

    let sink = SignalFxSink::new(
        SignalFxConfig::new(&config.signalfx.access_key).ingest_url(&config.signalfx.ingest_url),
    )
    .context("Creating SignalFx sink")?;

    let mut runner = Runner::new(
        Arc::new(connector),
        Arc::new(sink),
        Arc::new(config.catalog()),
        config.runner_config(),
    );

    tokio::spawn(stop_on_signal(runner.handle()));
    runner.run().await;

    Ok(())
}

async fn stop_on_signal(handle: RunnerHandle) {
    match shutdown_signal().await {
        Ok(signal) => {
            info!("Received {}, shutting down", signal);
            handle.stop().await;
        }
        Err(e) => error!("Unable to listen for shutdown signals: {}", e),
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| "Ctrl-C"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "Ctrl-C")
}
