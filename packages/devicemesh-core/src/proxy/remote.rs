//! Local projection of a remote device.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::devices::{
    CommandArgs, CommandSchema, DeviceController, DeviceError, DeviceResult, SensorSchema,
};
use crate::discovery::{DeviceAnnouncement, DiscoveryService};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::value_cell::{ValueCell, ValueWatch};

struct RemoteSensor {
    schema: SensorSchema,
    cell: ValueCell<Value>,
}

/// Proxy built from a device announcement.
///
/// Sensors are value cells seeded with the announced values and fed from the
/// value topics. Commands are RPC calls to the command topics with a fixed
/// timeout.
pub struct RemoteDevice {
    name: String,
    description: String,
    sensors: Vec<RemoteSensor>,
    commands: Vec<CommandSchema>,
    discovery: DiscoveryService,
    command_timeout: Duration,
    cancel: CancellationToken,
}

impl RemoteDevice {
    /// Builds the proxy and starts tracking its sensor value topics.
    ///
    /// # Arguments
    /// * `announcement` - First announcement seen for the device
    /// * `discovery` - Used to watch value topics and call commands
    /// * `command_timeout` - Deadline applied to every command call
    /// * `spawner` - Runs one value tracker per sensor
    pub fn from_announcement(
        announcement: DeviceAnnouncement,
        discovery: DiscoveryService,
        command_timeout: Duration,
        spawner: &TokioSpawner,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut sensors = Vec::with_capacity(announcement.sensors.len());

        for announced in &announcement.sensors {
            let cell = match announced.value.clone() {
                Some(value) => ValueCell::new(value),
                None => ValueCell::empty(),
            };

            match discovery.watch_sensor_value(&announcement.name, &announced.name) {
                Ok(mut values) => {
                    let tracked = cell.clone();
                    spawner.spawn_until(cancel.clone(), async move {
                        while let Some(value) = values.next().await {
                            tracked.set(value);
                        }
                    });
                }
                Err(e) => log::warn!(
                    "[Proxy] Not tracking {}.{}: {}",
                    announcement.name,
                    announced.name,
                    e
                ),
            }

            sensors.push(RemoteSensor {
                schema: announced.schema(),
                cell,
            });
        }

        Self {
            name: announcement.name,
            description: announcement.description,
            sensors,
            commands: announcement.commands,
            discovery,
            command_timeout,
            cancel,
        }
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Stops tracking value topics. Sensor streams keep their last value.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    fn sensor(&self, sensor: &str) -> DeviceResult<&RemoteSensor> {
        self.sensors
            .iter()
            .find(|s| s.schema.name == sensor)
            .ok_or_else(|| DeviceError::UnknownSensor {
                device: self.name.clone(),
                sensor: sensor.to_string(),
            })
    }
}

impl Drop for RemoteDevice {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl DeviceController for RemoteDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn sensors(&self) -> Vec<SensorSchema> {
        self.sensors.iter().map(|s| s.schema.clone()).collect()
    }

    fn sensor_value(&self, sensor: &str) -> DeviceResult<Option<Value>> {
        Ok(self.sensor(sensor)?.cell.get())
    }

    fn watch_sensor(&self, sensor: &str) -> DeviceResult<ValueWatch<Value>> {
        Ok(self.sensor(sensor)?.cell.watch())
    }

    fn commands(&self) -> Vec<CommandSchema> {
        self.commands.clone()
    }

    async fn call(&self, command: &str, args: CommandArgs) -> DeviceResult<Value> {
        let schema = self
            .commands
            .iter()
            .find(|c| c.name == command)
            .ok_or_else(|| DeviceError::UnknownCommand {
                device: self.name.clone(),
                command: command.to_string(),
            })?;
        schema.check_args(&args)?;

        log::debug!("[Proxy] Calling {}.{}", self.name, command);
        Ok(self
            .discovery
            .call_command(&self.name, command, &args, Some(self.command_timeout))
            .await?)
    }
}
