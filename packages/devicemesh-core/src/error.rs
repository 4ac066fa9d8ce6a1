//! Centralized error types for the devicemesh core library.
//!
//! Each component defines its own error enum next to the code that raises it.
//! This module gives every one of them a machine-readable code and folds them
//! into [`MeshError`] for callers that drive a whole node.

use thiserror::Error;

use crate::config::ConfigError;
use crate::devices::DeviceError;
use crate::discovery::DiscoveryError;
use crate::mux::{MuxError, TopicError};
use crate::rpc::RpcError;
use crate::transport::TransportError;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a stable, machine-readable error code.
    fn code(&self) -> &'static str;
}

impl ErrorCode for TopicError {
    fn code(&self) -> &'static str {
        match self {
            Self::Empty => "topic_empty",
            Self::WildcardInTopic(_) => "topic_wildcard",
            Self::MultiLevelNotLast(_) => "filter_multi_level_not_last",
            Self::PartialWildcard(_) => "filter_partial_wildcard",
            Self::InvalidLevel(_) => "topic_invalid_level",
        }
    }
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::Disconnected => "transport_disconnected",
            Self::SubscribeRejected { .. } => "subscribe_rejected",
            Self::PublishFailed { .. } => "publish_failed",
        }
    }
}

impl ErrorCode for MuxError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidFilter(_) => "invalid_filter",
            Self::InvalidTopic(_) => "invalid_topic",
            Self::Transport(e) => e.code(),
            Self::Closed => "multiplexer_closed",
        }
    }
}

impl ErrorCode for RpcError {
    fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "rpc_timeout",
            Self::Application(_) => "rpc_application_error",
            Self::Transport(e) => e.code(),
            Self::InvalidTopic(_) => "invalid_topic",
            Self::Protocol(_) => "rpc_protocol_error",
            Self::Cancelled => "rpc_cancelled",
            Self::Closed => "multiplexer_closed",
        }
    }
}

impl ErrorCode for DeviceError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownDevice(_) => "unknown_device",
            Self::UnknownSensor { .. } => "unknown_sensor",
            Self::UnknownCommand { .. } => "unknown_command",
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::InvalidValue { .. } => "invalid_sensor_value",
            Self::CommandFailed(_) => "command_failed",
            Self::Rpc(e) => e.code(),
        }
    }
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidName(e) => e.code(),
            Self::Encode(_) => "encode_failed",
            Self::NameTaken(_) => "device_name_taken",
            Self::Mux(e) => e.code(),
        }
    }
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidNamespace(_) => "invalid_namespace",
            Self::InvalidResponsePrefix(_) => "invalid_response_prefix",
            Self::ZeroCommandTimeout => "invalid_command_timeout",
            Self::ZeroEventCapacity => "invalid_event_capacity",
        }
    }
}

/// Node-wide error type.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Node configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Multiplexer or transport failure.
    #[error("Transport error: {0}")]
    Mux(#[from] MuxError),

    /// RPC call failed.
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// Device operation failed.
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Announcement or exposure failed.
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
}

impl MeshError {
    /// Returns the machine-readable code of the underlying error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.code(),
            Self::Mux(e) => e.code(),
            Self::Rpc(e) => e.code(),
            Self::Device(e) => e.code(),
            Self::Discovery(e) => e.code(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

pub use crate::devices::DeviceResult;
pub use crate::discovery::DiscoveryResult;
pub use crate::mux::MuxResult;
pub use crate::rpc::RpcResult;
pub use crate::transport::TransportResult;

/// Convenient Result alias for node-wide operations.
pub type MeshResult<T> = Result<T, MeshError>;
