//! Devicemesh Sim - two mesh nodes on an in-process broker.
//!
//! A device node exposes the configured virtual devices and lets their numeric
//! sensors drift. A control node discovers them periodically, mirrors their
//! sensors through proxies and invokes their commands over RPC.

mod config;
mod simulation;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use devicemesh_core::{
    CommandArgs, DeviceController, DeviceEvent, DiscoveryEvent, EventEmitter, LocalBroker,
    MeshNode,
};
use serde_json::json;
use tokio::signal;

use crate::config::SimConfig;
use crate::simulation::VirtualDevice;

/// Devicemesh Sim - Simulated devices discovered and controlled over pub/sub.
#[derive(Parser, Debug)]
#[command(name = "devicemesh-sim")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "DEVICEMESH_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Topic namespace (overrides config file).
    #[arg(short, long)]
    namespace: Option<String>,

    /// Seconds between discovery requests (overrides config file).
    #[arg(short = 'i', long)]
    discovery_interval: Option<u64>,
}

/// Logs the control node's events.
struct ConsoleEventEmitter;

impl EventEmitter for ConsoleEventEmitter {
    fn emit_device(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::Discovered {
                name,
                sensors,
                commands,
                ..
            } => log::info!(
                "[Control] Found '{}' with {} sensor(s), {} command(s)",
                name,
                sensors,
                commands
            ),
            DeviceEvent::AnnouncementIgnored { name, .. } => {
                log::debug!("[Control] '{}' re-announced", name)
            }
            DeviceEvent::Exposed { name, .. } => log::info!("[Control] Exposed '{}'", name),
        }
    }

    fn emit_discovery(&self, event: DiscoveryEvent) {
        log::debug!("[Control] {:?}", event);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Devicemesh Sim v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        SimConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(namespace) = args.namespace {
        config.namespace = namespace;
    }
    if let Some(interval) = args.discovery_interval {
        config.discovery_interval = interval;
    }
    config.validate().context("Invalid configuration")?;

    log::info!(
        "Configuration: namespace={}, devices={}, discovery_interval={}s, drift_interval={}ms",
        config.namespace,
        config.devices.len(),
        config.discovery_interval,
        config.drift_interval_ms
    );

    let broker = LocalBroker::new();
    let device_node = MeshNode::connect_local(config.to_mesh_config(), &broker)
        .context("Failed to start device node")?;
    let control_node = MeshNode::connect_local(config.to_mesh_config(), &broker)
        .context("Failed to start control node")?;
    control_node
        .event_bridge()
        .set_external_emitter(Arc::new(ConsoleEventEmitter));
    control_node.ready().await?;

    let devices: Vec<VirtualDevice> = config.devices.iter().map(VirtualDevice::from_config).collect();
    for device in &devices {
        let controller = device.device();
        let name = controller.name().to_string();
        device_node
            .expose(controller)
            .await
            .with_context(|| format!("Failed to expose '{}'", name))?;
    }

    log::info!("Nodes started, press Ctrl+C to stop");

    let mut discovery_timer = tokio::time::interval(config.discovery_interval());
    let mut drift_timer = tokio::time::interval(config.drift_interval());
    let mut drift_tick = 0u64;
    let mut probed = false;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = discovery_timer.tick() => {
                if let Err(e) = control_node.request_discovery().await {
                    log::warn!("[Control] Discovery request failed: {}", e);
                }
                report(&control_node);
                if !probed {
                    probed = probe(&control_node).await;
                }
            }
            _ = drift_timer.tick() => {
                for device in &devices {
                    device.drift(drift_tick);
                }
                drift_tick += 1;
            }
        }
    }

    log::info!("Shutdown signal received, cleaning up...");

    control_node.shutdown().await;
    device_node.shutdown().await;

    let stats = broker.stats();
    log::info!(
        "Broker: {} publish(es), {} subscribe(s), {} unsubscribe(s)",
        stats.published_total,
        stats.subscribes_total,
        stats.unsubscribes_total
    );
    log::info!("Shutdown complete");
    Ok(())
}

/// Logs the mirrored sensor values of every proxy.
fn report(node: &MeshNode) {
    for proxy in node.proxies().devices() {
        let readings: Vec<String> = proxy
            .sensors()
            .iter()
            .map(|sensor| match proxy.sensor_value(&sensor.name) {
                Ok(Some(value)) => format!("{}={}", sensor.name, value),
                _ => format!("{}=?", sensor.name),
            })
            .collect();
        log::info!("[Control] {}: {}", proxy.name(), readings.join(", "));
    }
}

/// Invokes `set` on each proxy with its current first sensor value.
///
/// Returns `false` while no proxies exist yet.
async fn probe(node: &MeshNode) -> bool {
    let proxies = node.proxies().devices();
    if proxies.is_empty() {
        return false;
    }

    for proxy in proxies {
        let Some(sensor) = proxy.sensors().into_iter().next() else {
            continue;
        };
        let Ok(Some(value)) = proxy.sensor_value(&sensor.name) else {
            continue;
        };

        let mut args = CommandArgs::new();
        args.insert("sensor".to_string(), json!(sensor.name));
        args.insert("value".to_string(), value);
        match node.call(proxy.name(), "set", args).await {
            Ok(reply) => log::info!("[Control] {}.set -> {}", proxy.name(), reply),
            Err(e) => log::warn!("[Control] {}.set failed ({}): {}", proxy.name(), e.code(), e),
        }
    }
    true
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
