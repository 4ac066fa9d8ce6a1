//! Device controller interface and schema types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::rpc::{HandlerError, RpcError};
use crate::value_cell::ValueWatch;

/// Named command arguments, serialized as the JSON object request body.
pub type CommandArgs = Map<String, Value>;

/// JSON type of a sensor value or command parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Boolean,
    Integer,
    Number,
    String,
    /// Structured value: object, array or null.
    Object,
}

impl ValueType {
    /// Returns whether `value` is an instance of this type.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Boolean => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Object => value.is_object() || value.is_array() || value.is_null(),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Object => "object",
        }
    }
}

/// Describes a readable sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub description: String,
}

impl SensorSchema {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            description: String::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Describes one named command argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub description: String,
}

/// Describes an invokable command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<CommandParameter>,
}

impl CommandSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Appends a parameter.
    #[must_use]
    pub fn param(
        mut self,
        name: impl Into<String>,
        value_type: ValueType,
        description: impl Into<String>,
    ) -> Self {
        self.parameters.push(CommandParameter {
            name: name.into(),
            value_type,
            description: description.into(),
        });
        self
    }

    /// Checks that every declared parameter is present with the declared type.
    ///
    /// Arguments that are not declared are passed through untouched.
    pub fn check_args(&self, args: &CommandArgs) -> DeviceResult<()> {
        for param in &self.parameters {
            match args.get(&param.name) {
                None => {
                    return Err(DeviceError::InvalidArguments(format!(
                        "missing argument '{}' for command '{}'",
                        param.name, self.name
                    )))
                }
                Some(value) if !param.value_type.accepts(value) => {
                    return Err(DeviceError::InvalidArguments(format!(
                        "argument '{}' of command '{}' must be {}",
                        param.name,
                        self.name,
                        param.value_type.as_str()
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by device controllers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceError {
    /// No local device or proxy is registered under this name.
    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("device '{device}' has no sensor '{sensor}'")]
    UnknownSensor { device: String, sensor: String },

    #[error("device '{device}' has no command '{command}'")]
    UnknownCommand { device: String, command: String },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("sensor '{sensor}' expects {expected}")]
    InvalidValue {
        sensor: String,
        expected: &'static str,
    },

    /// The command ran and reported a failure.
    #[error("{0}")]
    CommandFailed(String),

    /// The command could not be delivered or its reply never arrived.
    #[error(transparent)]
    Rpc(RpcError),
}

impl From<RpcError> for DeviceError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Application(message) => Self::CommandFailed(message),
            other => Self::Rpc(other),
        }
    }
}

impl From<DeviceError> for HandlerError {
    fn from(err: DeviceError) -> Self {
        HandlerError::new(err.to_string())
    }
}

/// Convenient Result alias for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

// ─────────────────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────────────────

/// Uniform interface over local devices and remote proxies.
///
/// Consumers cannot tell whether a controller is implemented in this process
/// or projected from an announcement.
#[async_trait]
pub trait DeviceController: Send + Sync {
    /// Globally unique device name.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn sensors(&self) -> Vec<SensorSchema>;

    /// Current value of a sensor. `None` until a value is known.
    fn sensor_value(&self, sensor: &str) -> DeviceResult<Option<Value>>;

    /// Live stream of a sensor, starting with its current value.
    fn watch_sensor(&self, sensor: &str) -> DeviceResult<ValueWatch<Value>>;

    fn commands(&self) -> Vec<CommandSchema>;

    /// Invokes a command with named arguments.
    async fn call(&self, command: &str, args: CommandArgs) -> DeviceResult<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_type_serializes_lowercase() {
        let schema = SensorSchema::new("state", ValueType::Boolean).with_description("Power");
        assert_eq!(
            serde_json::to_value(&schema).unwrap(),
            json!({"name": "state", "type": "boolean", "description": "Power"})
        );
    }

    #[test]
    fn value_type_accepts_matching_json() {
        assert!(ValueType::Integer.accepts(&json!(3)));
        assert!(!ValueType::Integer.accepts(&json!(3.5)));
        assert!(ValueType::Number.accepts(&json!(3.5)));
        assert!(ValueType::Object.accepts(&json!({"r": 1})));
        assert!(!ValueType::String.accepts(&json!(true)));
    }

    #[test]
    fn check_args_reports_missing_and_mistyped() {
        let schema = CommandSchema::new("dim").param("level", ValueType::Integer, "0-100");

        let mut args = CommandArgs::new();
        assert!(matches!(
            schema.check_args(&args),
            Err(DeviceError::InvalidArguments(_))
        ));

        args.insert("level".into(), json!("high"));
        assert!(schema.check_args(&args).is_err());

        args.insert("level".into(), json!(40));
        args.insert("extra".into(), json!(true));
        assert!(schema.check_args(&args).is_ok());
    }

    #[test]
    fn application_rpc_errors_become_command_failures() {
        let err: DeviceError = RpcError::Application("jammed".into()).into();
        assert_eq!(err, DeviceError::CommandFailed("jammed".into()));
        assert_eq!(HandlerError::from(err).message(), "jammed");

        let err: DeviceError = RpcError::Cancelled.into();
        assert!(matches!(err, DeviceError::Rpc(RpcError::Cancelled)));
    }
}
