//! Device announcement payload.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::devices::{CommandSchema, DeviceController, SensorSchema, ValueType};

/// Full snapshot of a device, published on `<ns>/device/<name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAnnouncement {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sensors: Vec<AnnouncedSensor>,
    #[serde(default)]
    pub commands: Vec<CommandSchema>,
}

/// Sensor schema plus its value at announcement time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnouncedSensor {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub value: Option<Value>,
}

impl AnnouncedSensor {
    #[must_use]
    pub fn schema(&self) -> SensorSchema {
        SensorSchema {
            name: self.name.clone(),
            value_type: self.value_type,
            description: self.description.clone(),
        }
    }
}

impl DeviceAnnouncement {
    /// Snapshots a controller's schemas and current sensor values.
    pub fn from_controller(device: &dyn DeviceController) -> Self {
        let sensors = device
            .sensors()
            .into_iter()
            .map(|schema| {
                let value = device.sensor_value(&schema.name).ok().flatten();
                AnnouncedSensor {
                    name: schema.name,
                    value_type: schema.value_type,
                    description: schema.description,
                    value,
                }
            })
            .collect();

        Self {
            name: device.name().to_string(),
            description: device.description().to_string(),
            sensors,
            commands: device.commands(),
        }
    }

    pub fn encode(&self) -> serde_json::Result<Bytes> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    pub fn decode(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::LocalDevice;
    use crate::test_fixtures::KITCHEN_LIGHT_ANNOUNCEMENT;
    use serde_json::json;

    #[test]
    fn decodes_wire_announcement() {
        let announcement = DeviceAnnouncement::decode(KITCHEN_LIGHT_ANNOUNCEMENT.as_bytes()).unwrap();

        assert_eq!(announcement.name, "kitchen-light");
        assert_eq!(announcement.sensors[0].name, "state");
        assert_eq!(announcement.sensors[0].value_type, ValueType::Boolean);
        assert_eq!(announcement.sensors[0].value, Some(json!(true)));
        assert_eq!(announcement.commands[1].parameters[0].value_type, ValueType::Integer);
    }

    #[test]
    fn snapshots_local_device() {
        let device = LocalDevice::builder("thermo")
            .description("Hall thermostat")
            .sensor(
                SensorSchema::new("temp", ValueType::Number).with_description("Celsius"),
                21.5,
            )
            .command(CommandSchema::new("reset"), |_args| async { Ok(Value::Null) })
            .build();

        let encoded = DeviceAnnouncement::from_controller(&device).encode().unwrap();
        let raw: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(
            raw,
            json!({
                "name": "thermo",
                "description": "Hall thermostat",
                "sensors": [
                    {"name": "temp", "type": "number", "description": "Celsius", "value": 21.5}
                ],
                "commands": [
                    {"name": "reset", "description": "", "parameters": []}
                ]
            })
        );
    }

    #[test]
    fn missing_name_is_malformed() {
        assert!(DeviceAnnouncement::decode(br#"{"sensors":[]}"#).is_err());
        assert!(DeviceAnnouncement::decode(b"{").is_err());
    }
}
