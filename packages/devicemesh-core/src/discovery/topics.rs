//! Topic layout of the discovery protocol.

use crate::mux::topic::LEVEL_SEPARATOR;
use crate::protocol_constants::{
    COMMAND_LEVEL, DEVICE_LEVEL, DISCOVERY_LEVEL, RESPONSE_LEVELS, SENSOR_LEVEL, VALUE_LEVEL,
};

/// Builds every topic used under one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    namespace: String,
}

impl Topics {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `<ns>/discovery`
    #[must_use]
    pub fn discovery(&self) -> String {
        format!("{}/{}", self.namespace, DISCOVERY_LEVEL)
    }

    /// `<ns>/device/<name>`
    #[must_use]
    pub fn device(&self, name: &str) -> String {
        format!("{}/{}/{}", self.namespace, DEVICE_LEVEL, name)
    }

    /// `<ns>/device/+`, matching every announcement.
    #[must_use]
    pub fn all_devices(&self) -> String {
        self.device("+")
    }

    /// `<ns>/device/<name>/sensor/<sensor>/value`
    #[must_use]
    pub fn sensor_value(&self, device: &str, sensor: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.device(device),
            SENSOR_LEVEL,
            sensor,
            VALUE_LEVEL
        )
    }

    /// `<ns>/device/<name>/command/<command>`
    #[must_use]
    pub fn command(&self, device: &str, command: &str) -> String {
        format!("{}/{}/{}", self.device(device), COMMAND_LEVEL, command)
    }

    /// `<ns>/rpc/response`
    #[must_use]
    pub fn response_prefix(&self) -> String {
        format!("{}/{}", self.namespace, RESPONSE_LEVELS)
    }

    /// Extracts the device name from an announcement topic.
    #[must_use]
    pub fn device_name<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let name = topic
            .strip_prefix(self.namespace.as_str())?
            .strip_prefix(LEVEL_SEPARATOR)?
            .strip_prefix(DEVICE_LEVEL)?
            .strip_prefix(LEVEL_SEPARATOR)?;
        (!name.is_empty() && !name.contains(LEVEL_SEPARATOR)).then_some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_namespaced_topics() {
        let topics = Topics::new("ns");
        assert_eq!(topics.discovery(), "ns/discovery");
        assert_eq!(topics.device("kitchen-light"), "ns/device/kitchen-light");
        assert_eq!(topics.all_devices(), "ns/device/+");
        assert_eq!(
            topics.sensor_value("kitchen", "temp"),
            "ns/device/kitchen/sensor/temp/value"
        );
        assert_eq!(
            topics.command("kitchen-light", "toggle"),
            "ns/device/kitchen-light/command/toggle"
        );
        assert_eq!(topics.response_prefix(), "ns/rpc/response");
    }

    #[test]
    fn device_name_only_parses_announcement_topics() {
        let topics = Topics::new("home/mesh");
        assert_eq!(topics.device_name("home/mesh/device/fan"), Some("fan"));
        assert_eq!(topics.device_name("home/mesh/device/fan/sensor/x/value"), None);
        assert_eq!(topics.device_name("home/mesh/device/"), None);
        assert_eq!(topics.device_name("other/device/fan"), None);
        assert_eq!(topics.device_name("home/meshdevice/fan"), None);
    }
}
