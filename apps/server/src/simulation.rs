//! Simulated devices built from configuration.

use std::sync::Arc;

use devicemesh_core::{
    CommandArgs, CommandSchema, DeviceError, LocalDevice, SensorSchema, ValueCell, ValueType,
};
use serde_json::{json, Value};

use crate::config::VirtualDeviceConfig;

struct DriftingSensor {
    name: String,
    value_type: ValueType,
    cell: ValueCell<Value>,
}

/// A local device whose numeric sensors wander over time.
pub struct VirtualDevice {
    device: Arc<LocalDevice>,
    sensors: Vec<DriftingSensor>,
}

impl VirtualDevice {
    /// Builds the device with one sensor per entry and a `set` command.
    ///
    /// `set` takes a `sensor` name and a `value` of that sensor's type.
    pub fn from_config(config: &VirtualDeviceConfig) -> Self {
        let mut builder = LocalDevice::builder(config.name.as_str()).description(&config.description);
        for sensor in &config.sensors {
            builder = builder.sensor(
                SensorSchema::new(sensor.name.as_str(), sensor.value_type)
                    .with_description(&sensor.description),
                sensor.initial.clone(),
            );
        }

        let sensors: Vec<DriftingSensor> = config
            .sensors
            .iter()
            .filter_map(|sensor| {
                builder.sensor_cell(&sensor.name).map(|cell| DriftingSensor {
                    name: sensor.name.clone(),
                    value_type: sensor.value_type,
                    cell,
                })
            })
            .collect();

        let targets: Arc<Vec<(String, ValueType, ValueCell<Value>)>> = Arc::new(
            sensors
                .iter()
                .map(|s| (s.name.clone(), s.value_type, s.cell.clone()))
                .collect(),
        );
        let device_name = config.name.clone();
        let set = CommandSchema::new("set")
            .with_description("Overwrite a sensor value")
            .param("sensor", ValueType::String, "Sensor name");

        let device = builder
            .command(set, move |args: CommandArgs| {
                let targets = Arc::clone(&targets);
                let device_name = device_name.clone();
                async move {
                    let sensor = args.get("sensor").and_then(Value::as_str).unwrap_or_default();
                    let value = args.get("value").cloned().unwrap_or(Value::Null);
                    let Some((name, value_type, cell)) =
                        targets.iter().find(|(name, _, _)| name == sensor)
                    else {
                        return Err(DeviceError::UnknownSensor {
                            device: device_name,
                            sensor: sensor.to_string(),
                        });
                    };
                    if !value_type.accepts(&value) {
                        return Err(DeviceError::InvalidValue {
                            sensor: name.clone(),
                            expected: value_type.as_str(),
                        });
                    }
                    cell.set(value.clone());
                    Ok(json!({ "sensor": name, "value": value }))
                }
            })
            .build();

        Self {
            device: Arc::new(device),
            sensors,
        }
    }

    #[must_use]
    pub fn device(&self) -> Arc<LocalDevice> {
        Arc::clone(&self.device)
    }

    /// Advances every numeric sensor by one step.
    pub fn drift(&self, tick: u64) {
        for sensor in &self.sensors {
            let Some(current) = sensor.cell.get() else {
                continue;
            };
            if let Some(next) = drift_value(sensor.value_type, &current, tick) {
                log::trace!("[Sim] {} drifts to {}", sensor.name, next);
                sensor.cell.set(next);
            }
        }
    }
}

/// Next value of a drifting sensor. Non-numeric sensors do not drift.
///
/// Values rise for two ticks then fall for two, so they stay near their start.
fn drift_value(value_type: ValueType, current: &Value, tick: u64) -> Option<Value> {
    let rising = tick % 4 < 2;
    match value_type {
        ValueType::Integer => {
            let step = if rising { 1 } else { -1 };
            current.as_i64().map(|v| json!(v + step))
        }
        ValueType::Number => {
            let step = if rising { 0.1 } else { -0.1 };
            current
                .as_f64()
                .map(|v| json!(((v + step) * 10.0).round() / 10.0))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VirtualSensorConfig;
    use devicemesh_core::DeviceController;

    fn thermostat() -> VirtualDevice {
        VirtualDevice::from_config(&VirtualDeviceConfig {
            name: "thermostat".into(),
            description: "Test thermostat".into(),
            sensors: vec![
                VirtualSensorConfig {
                    name: "temperature".into(),
                    value_type: ValueType::Number,
                    description: String::new(),
                    initial: json!(20.0),
                },
                VirtualSensorConfig {
                    name: "mode".into(),
                    value_type: ValueType::String,
                    description: String::new(),
                    initial: json!("heat"),
                },
            ],
        })
    }

    fn set_args(sensor: &str, value: Value) -> CommandArgs {
        let mut args = CommandArgs::new();
        args.insert("sensor".into(), json!(sensor));
        args.insert("value".into(), value);
        args
    }

    #[test]
    fn drift_oscillates_numeric_values() {
        assert_eq!(drift_value(ValueType::Integer, &json!(10), 0), Some(json!(11)));
        assert_eq!(drift_value(ValueType::Integer, &json!(10), 2), Some(json!(9)));
        assert_eq!(drift_value(ValueType::Number, &json!(21.5), 1), Some(json!(21.6)));
        assert_eq!(drift_value(ValueType::Boolean, &json!(true), 0), None);
    }

    #[test]
    fn drift_leaves_strings_alone() {
        let device = thermostat();
        device.drift(0);
        let controller = device.device();
        assert_eq!(controller.sensor_value("temperature").unwrap(), Some(json!(20.1)));
        assert_eq!(controller.sensor_value("mode").unwrap(), Some(json!("heat")));
    }

    #[tokio::test]
    async fn set_command_updates_sensor() {
        let device = thermostat().device();
        let reply = device
            .call("set", set_args("mode", json!("cool")))
            .await
            .unwrap();
        assert_eq!(reply, json!({"sensor": "mode", "value": "cool"}));
        assert_eq!(device.sensor_value("mode").unwrap(), Some(json!("cool")));
    }

    #[tokio::test]
    async fn set_command_checks_sensor_and_type() {
        let device = thermostat().device();
        assert!(matches!(
            device.call("set", set_args("humidity", json!(40))).await,
            Err(DeviceError::UnknownSensor { .. })
        ));
        assert!(matches!(
            device.call("set", set_args("temperature", json!("warm"))).await,
            Err(DeviceError::InvalidValue { .. })
        ));
    }
}
