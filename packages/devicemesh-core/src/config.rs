//! Node configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::discovery::Topics;
use crate::mux::topic::{self, LEVEL_SEPARATOR};
use crate::protocol_constants::{
    DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_NAMESPACE, EVENT_CHANNEL_CAPACITY,
};

/// Errors for configuration values that would break the node at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("namespace '{0}' must be a non-empty topic without wildcards or edge separators")]
    InvalidNamespace(String),

    #[error("response topic prefix '{0}' must be a non-empty topic without wildcards")]
    InvalidResponsePrefix(String),

    #[error("command_timeout_ms must be >= 1")]
    ZeroCommandTimeout,

    #[error("event_channel_capacity must be >= 1 (broadcast::channel panics on 0)")]
    ZeroEventCapacity,
}

/// Configuration for a mesh node.
///
/// All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Prefix of every topic the node uses.
    pub namespace: String,

    /// Deadline for commands invoked through remote proxies (milliseconds).
    pub command_timeout_ms: u64,

    /// Prefix for generated RPC response topics. Defaults to `<namespace>/rpc/response`.
    pub response_topic_prefix: Option<String>,

    /// Capacity of the domain event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            response_topic_prefix: None,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl MeshConfig {
    /// Default configuration under another namespace.
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if topic::validate_topic(&self.namespace).is_err()
            || self.namespace.starts_with(LEVEL_SEPARATOR)
            || self.namespace.ends_with(LEVEL_SEPARATOR)
        {
            return Err(ConfigError::InvalidNamespace(self.namespace.clone()));
        }
        if let Some(ref prefix) = self.response_topic_prefix {
            if topic::validate_topic(prefix).is_err() {
                return Err(ConfigError::InvalidResponsePrefix(prefix.clone()));
            }
        }
        if self.command_timeout_ms == 0 {
            return Err(ConfigError::ZeroCommandTimeout);
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::ZeroEventCapacity);
        }
        Ok(())
    }

    #[must_use]
    pub fn topics(&self) -> Topics {
        Topics::new(self.namespace.clone())
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Effective prefix for generated response topics.
    #[must_use]
    pub fn response_prefix(&self) -> String {
        self.response_topic_prefix
            .clone()
            .unwrap_or_else(|| self.topics().response_prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MeshConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.namespace, "devicemesh");
        assert_eq!(config.command_timeout(), Duration::from_secs(5));
        assert_eq!(config.response_prefix(), "devicemesh/rpc/response");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: MeshConfig =
            serde_json::from_str(r#"{"namespace":"home","response_topic_prefix":"rsp"}"#).unwrap();
        assert_eq!(config.command_timeout_ms, 5000);
        assert_eq!(config.response_prefix(), "rsp");
        assert_eq!(config.topics().discovery(), "home/discovery");
    }

    #[test]
    fn rejects_unusable_values() {
        for namespace in ["", "a/+", "/home", "home/"] {
            assert_eq!(
                MeshConfig::with_namespace(namespace).validate(),
                Err(ConfigError::InvalidNamespace(namespace.into()))
            );
        }

        let config = MeshConfig {
            command_timeout_ms: 0,
            ..MeshConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroCommandTimeout));

        let config = MeshConfig {
            event_channel_capacity: 0,
            ..MeshConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroEventCapacity));

        let config = MeshConfig {
            response_topic_prefix: Some("rsp/#".into()),
            ..MeshConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidResponsePrefix(_))
        ));
    }
}
