//! Devices implemented in this process.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::value_cell::{ValueCell, ValueWatch};

use super::controller::{
    CommandArgs, CommandSchema, DeviceController, DeviceError, DeviceResult, SensorSchema,
};

type CommandFn = Arc<dyn Fn(CommandArgs) -> BoxFuture<'static, DeviceResult<Value>> + Send + Sync>;

struct LocalSensor {
    schema: SensorSchema,
    cell: ValueCell<Value>,
}

struct LocalCommand {
    schema: CommandSchema,
    handler: CommandFn,
}

/// A device whose sensors and commands live in this process.
///
/// Sensors and commands are declared up front through [`LocalDevice::builder`].
/// Sensor values change through [`set_sensor`](Self::set_sensor), or through a
/// cell captured from the builder by a command handler.
pub struct LocalDevice {
    name: String,
    description: String,
    sensors: Vec<LocalSensor>,
    commands: Vec<LocalCommand>,
}

impl LocalDevice {
    pub fn builder(name: impl Into<String>) -> LocalDeviceBuilder {
        LocalDeviceBuilder {
            name: name.into(),
            description: String::new(),
            sensors: Vec::new(),
            commands: Vec::new(),
        }
    }

    /// Updates a sensor and notifies its watchers.
    pub fn set_sensor(&self, sensor: &str, value: Value) -> DeviceResult<()> {
        let entry = self.sensor(sensor)?;
        if !entry.schema.value_type.accepts(&value) {
            return Err(DeviceError::InvalidValue {
                sensor: sensor.to_string(),
                expected: entry.schema.value_type.as_str(),
            });
        }
        log::trace!("[Device] {}.{} = {}", self.name, sensor, value);
        entry.cell.set(value);
        Ok(())
    }

    fn sensor(&self, sensor: &str) -> DeviceResult<&LocalSensor> {
        self.sensors
            .iter()
            .find(|s| s.schema.name == sensor)
            .ok_or_else(|| DeviceError::UnknownSensor {
                device: self.name.clone(),
                sensor: sensor.to_string(),
            })
    }
}

#[async_trait]
impl DeviceController for LocalDevice {
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
        self.commands.iter().map(|c| c.schema.clone()).collect()
    }

    async fn call(&self, command: &str, args: CommandArgs) -> DeviceResult<Value> {
        let entry = self
            .commands
            .iter()
            .find(|c| c.schema.name == command)
            .ok_or_else(|| DeviceError::UnknownCommand {
                device: self.name.clone(),
                command: command.to_string(),
            })?;
        entry.schema.check_args(&args)?;
        let handler = Arc::clone(&entry.handler);
        handler(args).await
    }
}

/// Declares the sensors and commands of a [`LocalDevice`].
pub struct LocalDeviceBuilder {
    name: String,
    description: String,
    sensors: Vec<LocalSensor>,
    commands: Vec<LocalCommand>,
}

impl LocalDeviceBuilder {
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declares a sensor with its initial value. Redeclaring a name replaces it.
    #[must_use]
    pub fn sensor(mut self, schema: SensorSchema, initial: impl Into<Value>) -> Self {
        let sensor = LocalSensor {
            cell: ValueCell::new(initial.into()),
            schema,
        };
        match self
            .sensors
            .iter_mut()
            .find(|s| s.schema.name == sensor.schema.name)
        {
            Some(existing) => *existing = sensor,
            None => self.sensors.push(sensor),
        }
        self
    }

    /// Declares a command. Redeclaring a name replaces it.
    #[must_use]
    pub fn command<F, Fut>(mut self, schema: CommandSchema, handler: F) -> Self
    where
        F: Fn(CommandArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DeviceResult<Value>> + Send + 'static,
    {
        let handler: CommandFn = Arc::new(move |args| Box::pin(handler(args)));
        let command = LocalCommand { schema, handler };
        match self
            .commands
            .iter_mut()
            .find(|c| c.schema.name == command.schema.name)
        {
            Some(existing) => *existing = command,
            None => self.commands.push(command),
        }
        self
    }

    /// Returns the cell backing a declared sensor, for command handlers that
    /// update sensors of the device being built.
    #[must_use]
    pub fn sensor_cell(&self, sensor: &str) -> Option<ValueCell<Value>> {
        self.sensors
            .iter()
            .find(|s| s.schema.name == sensor)
            .map(|s| s.cell.clone())
    }

    pub fn build(self) -> LocalDevice {
        LocalDevice {
            name: self.name,
            description: self.description,
            sensors: self.sensors,
            commands: self.commands,
        }
    }
}
