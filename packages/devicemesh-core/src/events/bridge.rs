//! Bridge that fans domain events out over a broadcast channel.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{DeviceEvent, DiscoveryEvent, MeshEvent};

/// Forwards domain events to a `tokio::sync::broadcast` channel.
///
/// An optional external emitter (set after construction) receives every event
/// as well, for embedding applications with their own delivery path.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<MeshEvent>,
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an external emitter that receives every event in addition to the
    /// broadcast channel.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.tx.subscribe()
    }
}

/// Generates an [`EventEmitter`] method that forwards to the external emitter
/// (if set) and then sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Some(ref emitter) = *self.external_emitter.read() {
                emitter.$method(event.clone());
            }
            if let Err(e) = self.tx.send(MeshEvent::$variant(event)) {
                log::trace!("[EventBridge] No broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_device, DeviceEvent, Device);
    impl_emit!(emit_discovery, DiscoveryEvent, Discovery);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingEmitter {
        devices: Mutex<Vec<DeviceEvent>>,
    }

    impl EventEmitter for RecordingEmitter {
        fn emit_device(&self, event: DeviceEvent) {
            self.devices.lock().push(event);
        }

        fn emit_discovery(&self, _event: DiscoveryEvent) {}
    }

    #[tokio::test]
    async fn events_reach_subscribers_and_external_emitter() {
        let bridge = BroadcastEventBridge::new(8);
        let mut rx = bridge.subscribe();
        let external = Arc::new(RecordingEmitter::default());
        bridge.set_external_emitter(external.clone());

        let event = DeviceEvent::AnnouncementIgnored {
            name: "kitchen-light".into(),
            timestamp: 1,
        };
        bridge.emit_device(event.clone());

        assert_eq!(rx.recv().await.unwrap(), MeshEvent::Device(event.clone()));
        assert_eq!(*external.devices.lock(), vec![event]);
    }

    #[test]
    fn emitting_without_receivers_is_harmless() {
        let bridge = BroadcastEventBridge::new(1);
        bridge.emit_discovery(DiscoveryEvent::RequestSent { timestamp: 0 });
    }
}
