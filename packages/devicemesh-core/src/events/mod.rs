//! Domain events for observing device lifecycle on a node.
//!
//! This module provides:
//! - [`EventEmitter`] trait for components to emit events
//! - [`BroadcastEventBridge`] fanning events out to any number of listeners
//! - Event types per category (devices, discovery)

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

/// Events published by a mesh node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum MeshEvent {
    /// Device registration and proxy lifecycle.
    Device(DeviceEvent),

    /// Discovery traffic.
    Discovery(DiscoveryEvent),
}

/// Events related to devices known to this node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeviceEvent {
    /// A local device was exposed to the mesh.
    Exposed {
        name: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A remote device was announced for the first time and proxied.
    Discovered {
        name: String,
        sensors: usize,
        commands: usize,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// An announcement for an already known name was discarded.
    AnnouncementIgnored {
        name: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Events related to discovery requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DiscoveryEvent {
    /// This node asked the mesh to re-announce.
    RequestSent {
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A discovery request arrived and local devices were re-announced.
    RequestAnswered {
        /// Number of local devices announced in response.
        announced: usize,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_category_and_type_tags() {
        let event = MeshEvent::Device(DeviceEvent::Discovered {
            name: "kitchen-light".into(),
            sensors: 2,
            commands: 1,
            timestamp: 7,
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "category": "device",
                "type": "discovered",
                "name": "kitchen-light",
                "sensors": 2,
                "commands": 1,
                "timestamp": 7
            })
        );
    }
}
