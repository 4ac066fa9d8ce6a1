//! Devicemesh Core - device discovery and control over a pub/sub broker.
//!
//! Nodes share one broker namespace. Each node exposes local devices (sensors
//! and commands), answers discovery requests, and turns the announcements of
//! other nodes into proxies that behave like local devices.
//!
//! # Architecture
//!
//! The crate is organized into layers, bottom-up:
//!
//! - [`transport`]: Broker connection trait and an in-process loopback broker
//! - [`mux`]: Topic multiplexer sharing one broker subscription per filter
//! - [`rpc`]: Request/response over pub/sub with generated reply topics
//! - [`devices`]: Device abstraction, local devices and the node registry
//! - [`discovery`]: Announcement protocol and the announcer for local devices
//! - [`proxy`]: Remote device proxies built from announcements
//! - [`events`]: Domain events for observers of a node
//! - [`bootstrap`]: Composition root wiring a [`MeshNode`]
//!
//! # Abstraction Traits
//!
//! - [`Transport`](transport::Transport): Broker connection
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`RequestHandler`](rpc::RequestHandler): Serving an RPC topic
//! - [`DeviceController`](devices::DeviceController): Sensors and commands of a device
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events

#![warn(clippy::all)]

pub mod bootstrap;
pub mod config;
pub mod devices;
pub mod discovery;
pub mod error;
pub mod events;
pub mod mux;
pub mod protocol_constants;
pub mod proxy;
pub mod rpc;
pub mod runtime;
pub mod transport;
pub mod utils;
pub mod value_cell;

#[cfg(test)]
mod test_fixtures;

// Re-export commonly used types at the crate root
pub use bootstrap::{bootstrap_node, MeshNode};
pub use config::{ConfigError, MeshConfig};
pub use devices::{
    CommandArgs, CommandSchema, DeviceController, DeviceError, DeviceOrigin, DeviceRegistry,
    LocalDevice, SensorSchema, ValueType,
};
pub use discovery::{DeviceAnnouncement, DiscoveryError, DiscoveryService, Topics};
pub use error::{ErrorCode, MeshError, MeshResult};
pub use events::{
    BroadcastEventBridge, DeviceEvent, DiscoveryEvent, EventEmitter, LoggingEventEmitter,
    MeshEvent, NoopEventEmitter,
};
pub use mux::{Subscription, TopicMessage, TopicMultiplexer};
pub use proxy::{ProxyBuilder, RemoteDevice};
pub use rpc::{HandlerError, RequestHandler, RpcClient, RpcError, RpcServer};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use transport::{InboundMessage, LocalBroker, Transport, TransportError};
pub use utils::now_millis;
pub use value_cell::{ValueCell, ValueWatch};
