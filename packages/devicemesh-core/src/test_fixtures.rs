//! Shared fixtures for unit tests.

use std::sync::Arc;

use crate::mux::TopicMultiplexer;
use crate::runtime::TokioSpawner;
use crate::transport::LocalBroker;

/// Announcement of a dimmable light, as another node would publish it.
pub const KITCHEN_LIGHT_ANNOUNCEMENT: &str = r#"{
    "name": "kitchen-light",
    "description": "Ceiling light above the counter",
    "sensors": [
        {"name": "state", "type": "boolean", "description": "Power state", "value": true},
        {"name": "brightness", "type": "integer", "description": "Percent", "value": 80}
    ],
    "commands": [
        {"name": "toggle", "description": "Flip power", "parameters": []},
        {
            "name": "dim",
            "description": "Set brightness",
            "parameters": [{"name": "level", "type": "integer", "description": "0-100"}]
        }
    ]
}"#;

/// Same device name, different content.
pub const KITCHEN_LIGHT_REANNOUNCEMENT: &str = r#"{
    "name": "kitchen-light",
    "description": "Impostor",
    "sensors": [{"name": "state", "type": "boolean", "description": "", "value": false}],
    "commands": []
}"#;

/// Opens a multiplexer on a fresh connection to `broker`.
pub fn connect(broker: &LocalBroker) -> TopicMultiplexer {
    let (transport, inbound) = broker.connect();
    TopicMultiplexer::new(Arc::new(transport), inbound, &TokioSpawner::current())
}
