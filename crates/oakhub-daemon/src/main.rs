//! OakHub daemon - main entry point
//!
//! Registers the configured devices, runs the device lifecycle over the
//! simulated backend and shuts it down on Ctrl-C.

mod cloud;
mod config;
mod pipeline;
mod sim;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use oakhub_manager::{DeviceManager, ManagerEvent};

#[derive(Parser, Debug)]
#[command(name = "oakhub")]
#[command(about = "OAK device lifecycle daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "oakhub.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single connection pass and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("OakHub v{}", env!("CARGO_PKG_VERSION"));

    let config = config::load_config(&args.config)?;
    info!(
        devices = config.devices.len(),
        simulated = config.simulated.len(),
        "Configuration loaded"
    );

    let connector = Arc::new(sim::SimConnector::new(&config.simulated)?);
    let agent = Arc::new(cloud::LogAgent::new(connector.serials()));
    let streams = Arc::new(cloud::LogStreams::new());
    let manager = Arc::new(DeviceManager::new(
        connector,
        agent,
        streams,
        config.lifecycle.clone(),
    ));

    for device_config in &config.devices {
        let device = manager.get_device(device_config.identity.clone())?;
        pipeline::build(&device, device_config)?;
    }
    let assigned = manager.get_all_devices();
    info!(
        registered = manager.devices().len(),
        assigned = assigned.len(),
        "Devices registered"
    );

    tokio::spawn(log_events(manager.subscribe()));

    if args.once {
        let runner = Arc::clone(&manager);
        let connected = tokio::task::spawn_blocking(move || runner.connect_pass()).await?;
        println!("Connected {} of {} devices:", connected, manager.devices().len());
        for name in manager.live_devices() {
            println!("  - {}", name);
        }
        let runner = Arc::clone(&manager);
        tokio::task::spawn_blocking(move || runner.stop()).await?;
        return Ok(());
    }

    let runner = Arc::clone(&manager);
    let starter = tokio::task::spawn_blocking(move || runner.start());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    let runner = Arc::clone(&manager);
    tokio::task::spawn_blocking(move || runner.stop()).await?;
    starter.await??;

    Ok(())
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<ManagerEvent>) {
    loop {
        match events.recv().await {
            Ok(ManagerEvent::DeviceConnected { device, at }) => {
                info!(device = %device, at = %at, "Device connected");
            }
            Ok(ManagerEvent::DeviceDisconnected { device }) => {
                info!(device = %device, "Device disconnected");
            }
            Ok(ManagerEvent::ConnectFailed { device }) => {
                warn!(device = %device, "Connection attempt failed");
            }
            Ok(ManagerEvent::ShutdownComplete) => {
                info!("Shutdown complete");
                break;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "Event log lagging");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
