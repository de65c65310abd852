//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the meterlink daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use meterlink_common::{init_tracing, BridgeConfig, LoadedBridgeConfig};
use meterlink_core::BridgeController;
use meterlink_metrics::{new_registry, spawn_http_server, BridgeMetrics};
use meterlink_sensor::sensor_from_config;
use meterlink_ua::OpcUaConnector;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Bridge a PZEM power meter into an OPC UA address space",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Use the simulated meter instead of the serial device")]
    simulate: bool,

    #[arg(long, help = "Load and validate the configuration, then exit")]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/meterlink.toml"));
    candidates.push(PathBuf::from("configs/meterlink.example.toml"));

    let loaded = BridgeConfig::load_with_source(&candidates)?;
    if cli.check_config {
        print_summary(&loaded);
        return Ok(());
    }

    let LoadedBridgeConfig {
        mut config,
        source,
        overrides,
    } = loaded;
    if cli.simulate {
        config.pzem.simulate = true;
    }
    init_tracing("meterlinkd", &config.logging, &config.application)?;

    info!(config_path = %source.display(), "configuration loaded");
    if !overrides.is_empty() {
        info!(variables = ?overrides, "environment overrides applied");
    }
    let device = if config.pzem.simulate {
        "simulate"
    } else {
        config.pzem.device.as_str()
    };
    info!(
        application = %config.opcua.application_name,
        endpoint = %config.opcua.server_url,
        device,
        sample_interval_s = config.timing.sample_interval.as_secs_f64(),
        "meterlinkd starting"
    );

    run_bridge(config).await
}

async fn run_bridge(config: BridgeConfig) -> Result<()> {
    let connector = Arc::new(OpcUaConnector::new(config.opcua.clone()));
    let mut controller = BridgeController::new(&config, connector)?;

    let metrics_server = if config.metrics.enabled {
        let registry = new_registry();
        controller = controller.with_metrics(BridgeMetrics::new(registry.clone())?);
        let server = spawn_http_server(registry, config.metrics.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        Some(server)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let source = sensor_from_config(&config.pzem, config.pzem.read_interval);
    let outcome = controller.run(source, cancel).await;

    if let Some(server) = metrics_server {
        if let Err(err) = server.shutdown().await {
            warn!(error = %err, "metrics exporter did not shut down cleanly");
        }
    }

    outcome.context("bridge stopped")?;
    info!("meterlinkd stopped");
    Ok(())
}

async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("ctrl-c received; shutting down"),
                    _ = terminate.recv() => info!("SIGTERM received; shutting down"),
                }
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable");
                wait_for_ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    wait_for_ctrl_c().await;

    cancel.cancel();
}

async fn wait_for_ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("ctrl-c received; shutting down"),
        Err(err) => warn!(error = %err, "ctrl-c handler failed; shutting down"),
    }
}

fn print_summary(loaded: &LoadedBridgeConfig) {
    let config = &loaded.config;
    println!("Config: {}", loaded.source.display());
    println!("Server: {}", config.opcua.server_url);
    println!("Root node: {}", config.opcua.machine_root_nodeid);
    println!("Channel path: {}", config.opcua.channel_path.join(" / "));
    println!("Variables: {}", config.opcua.variables.join(", "));
    println!(
        "Meter: {} @ {} baud{}",
        config.pzem.device,
        config.pzem.baudrate,
        if config.pzem.simulate { " (simulated)" } else { "" }
    );
    println!(
        "Sample interval: {:.1}s, retries: {}",
        config.timing.sample_interval.as_secs_f64(),
        config.opcua.retries
    );
    if !loaded.overrides.is_empty() {
        println!("Environment overrides: {}", loaded.overrides.join(", "));
    }
}
