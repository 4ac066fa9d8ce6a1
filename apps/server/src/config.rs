//! Simulation configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use devicemesh_core::{MeshConfig, ValueType};
use serde::Deserialize;
use serde_json::{json, Value};

/// Simulation configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Namespace shared by both simulated nodes.
    /// Override: `DEVICEMESH_NAMESPACE`
    pub namespace: String,

    /// Deadline for commands invoked through proxies, in milliseconds.
    /// Override: `DEVICEMESH_COMMAND_TIMEOUT_MS`
    pub command_timeout_ms: u64,

    /// Interval in seconds between discovery requests.
    /// Override: `DEVICEMESH_DISCOVERY_INTERVAL`
    pub discovery_interval: u64,

    /// Interval in milliseconds between sensor drift steps.
    /// Override: `DEVICEMESH_DRIFT_INTERVAL_MS`
    pub drift_interval_ms: u64,

    /// Devices exposed by the simulated device node.
    pub devices: Vec<VirtualDeviceConfig>,
}

/// A simulated device.
#[derive(Debug, Clone, Deserialize)]
pub struct VirtualDeviceConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sensors: Vec<VirtualSensorConfig>,
}

/// A sensor of a simulated device.
#[derive(Debug, Clone, Deserialize)]
pub struct VirtualSensorConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub description: String,
    pub initial: Value,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            namespace: devicemesh_core::protocol_constants::DEFAULT_NAMESPACE.to_string(),
            command_timeout_ms: devicemesh_core::protocol_constants::DEFAULT_COMMAND_TIMEOUT_MS,
            discovery_interval: 30,
            drift_interval_ms: 2000,
            devices: default_devices(),
        }
    }
}

fn default_devices() -> Vec<VirtualDeviceConfig> {
    let sensor = |name: &str, value_type: ValueType, description: &str, initial: Value| {
        VirtualSensorConfig {
            name: name.to_string(),
            value_type,
            description: description.to_string(),
            initial,
        }
    };
    vec![
        VirtualDeviceConfig {
            name: "kitchen-light".to_string(),
            description: "Ceiling light above the counter".to_string(),
            sensors: vec![
                sensor("state", ValueType::Boolean, "Power state", json!(true)),
                sensor("brightness", ValueType::Integer, "Percent", json!(80)),
            ],
        },
        VirtualDeviceConfig {
            name: "hallway-thermostat".to_string(),
            description: "Thermostat next to the front door".to_string(),
            sensors: vec![
                sensor("temperature", ValueType::Number, "Degrees Celsius", json!(21.5)),
                sensor("mode", ValueType::String, "heat, cool or off", json!("heat")),
            ],
        },
    ]
}

impl SimConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_yaml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies `DEVICEMESH_*` overrides. Unparseable values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("DEVICEMESH_NAMESPACE") {
            self.namespace = val;
        }

        if let Some(val) = lookup("DEVICEMESH_COMMAND_TIMEOUT_MS") {
            if let Ok(timeout) = val.parse() {
                self.command_timeout_ms = timeout;
            }
        }

        if let Some(val) = lookup("DEVICEMESH_DISCOVERY_INTERVAL") {
            if let Ok(interval) = val.parse() {
                self.discovery_interval = interval;
            }
        }

        if let Some(val) = lookup("DEVICEMESH_DRIFT_INTERVAL_MS") {
            if let Ok(interval) = val.parse() {
                self.drift_interval_ms = interval;
            }
        }

        // Note: DEVICEMESH_LOG_LEVEL is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Checks intervals and the device list.
    pub fn validate(&self) -> Result<()> {
        if self.discovery_interval == 0 {
            bail!("discovery_interval must be greater than zero");
        }
        if self.drift_interval_ms == 0 {
            bail!("drift_interval_ms must be greater than zero");
        }

        let mut names = HashSet::new();
        for device in &self.devices {
            if !names.insert(device.name.as_str()) {
                bail!("device '{}' is declared twice", device.name);
            }
            let mut sensors = HashSet::new();
            for sensor in &device.sensors {
                if !sensors.insert(sensor.name.as_str()) {
                    bail!("sensor '{}.{}' is declared twice", device.name, sensor.name);
                }
                if !sensor.value_type.accepts(&sensor.initial) {
                    bail!(
                        "initial value of '{}.{}' must be {}",
                        device.name,
                        sensor.name,
                        sensor.value_type.as_str()
                    );
                }
            }
        }

        self.to_mesh_config().validate()?;
        Ok(())
    }

    /// Converts to devicemesh-core's node configuration.
    pub fn to_mesh_config(&self) -> MeshConfig {
        MeshConfig {
            command_timeout_ms: self.command_timeout_ms,
            ..MeshConfig::with_namespace(self.namespace.clone())
        }
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval)
    }

    pub fn drift_interval(&self) -> Duration {
        Duration::from_millis(self.drift_interval_ms)
    }
}
