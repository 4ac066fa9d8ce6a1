//! Event emitter abstraction.
//!
//! Components depend on the [`EventEmitter`] trait rather than a concrete
//! channel, so tests and embedding applications can observe events their own way.

use super::{DeviceEvent, DiscoveryEvent};

/// Trait for emitting domain events without knowledge of delivery.
pub trait EventEmitter: Send + Sync {
    /// Emits a device lifecycle event.
    fn emit_device(&self, event: DeviceEvent);

    /// Emits a discovery traffic event.
    fn emit_discovery(&self, event: DiscoveryEvent);
}

/// Discards every event.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_device(&self, _event: DeviceEvent) {}

    fn emit_discovery(&self, _event: DiscoveryEvent) {}
}

/// Logs every event at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_device(&self, event: DeviceEvent) {
        tracing::debug!(?event, "device_event");
    }

    fn emit_discovery(&self, event: DiscoveryEvent) {
        tracing::debug!(?event, "discovery_event");
    }
}
