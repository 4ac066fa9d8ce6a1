//! Node bootstrap and dependency wiring.
//!
//! This module contains the composition root: the single place where the
//! transport, multiplexer, RPC endpoints, discovery service, announcer, proxy
//! builder and registry of a node are created and wired together.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::config::MeshConfig;
use crate::devices::{CommandArgs, DeviceController, DeviceError, DeviceRegistry};
use crate::discovery::{Announcer, DiscoveryService, ExposedDevice};
use crate::error::MeshResult;
use crate::events::{BroadcastEventBridge, DiscoveryEvent, EventEmitter, MeshEvent};
use crate::mux::TopicMultiplexer;
use crate::proxy::ProxyBuilder;
use crate::rpc::{RpcClient, RpcServer};
use crate::runtime::TokioSpawner;
use crate::transport::{InboundMessage, LocalBroker, Transport};
use crate::utils::now_millis;

/// A wired mesh node.
///
/// Owns one transport connection. Local devices are exposed through
/// [`expose`](Self::expose); remote devices appear in the registry as proxies
/// once announced.
pub struct MeshNode {
    config: MeshConfig,
    mux: TopicMultiplexer,
    discovery: DiscoveryService,
    registry: DeviceRegistry,
    announcer: Announcer,
    proxies: ProxyBuilder,
    event_bridge: Arc<BroadcastEventBridge>,
    exposed: Mutex<Vec<ExposedDevice>>,
}

/// Bootstraps a node over a connected transport.
///
/// Services are created in dependency order:
///
/// 1. Multiplexer (owns the connection)
/// 2. RPC client and server (share the multiplexer)
/// 3. Discovery service (depends on both RPC endpoints)
/// 4. Announcer and proxy builder (depend on discovery, registry and events)
///
/// # Arguments
/// * `config` - Node configuration, validated here
/// * `transport` - Connected broker transport
/// * `inbound` - Messages the broker routes to this connection
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the initial
/// subscriptions cannot be queued.
pub fn bootstrap_node(
    config: MeshConfig,
    transport: Arc<dyn Transport>,
    inbound: mpsc::UnboundedReceiver<InboundMessage>,
) -> MeshResult<MeshNode> {
    config.validate()?;

    let spawner = TokioSpawner::current();
    let topics = config.topics();

    let mux = TopicMultiplexer::new(transport, inbound, &spawner);
    let client = RpcClient::new(mux.clone(), config.response_prefix(), spawner.clone());
    let server = RpcServer::new(mux.clone(), spawner.clone());
    let discovery = DiscoveryService::new(topics, mux.clone(), client, server);

    let event_bridge = Arc::new(BroadcastEventBridge::new(config.event_channel_capacity));
    let registry = DeviceRegistry::new();

    let announcer = Announcer::new(
        discovery.clone(),
        registry.clone(),
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        spawner.clone(),
    )?;
    let proxies = ProxyBuilder::start(
        discovery.clone(),
        registry.clone(),
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        spawner,
        config.command_timeout(),
    )?;

    log::info!("[Node] Started in namespace '{}'", config.namespace);

    Ok(MeshNode {
        config,
        mux,
        discovery,
        registry,
        announcer,
        proxies,
        event_bridge,
        exposed: Mutex::new(Vec::new()),
    })
}

impl MeshNode {
    /// Bootstraps a node on a new connection to an in-process broker.
    pub fn connect_local(config: MeshConfig, broker: &LocalBroker) -> MeshResult<Self> {
        let (transport, inbound) = broker.connect();
        bootstrap_node(config, Arc::new(transport), inbound)
    }

    #[must_use]
    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    #[must_use]
    pub fn multiplexer(&self) -> &TopicMultiplexer {
        &self.mux
    }

    #[must_use]
    pub fn discovery(&self) -> &DiscoveryService {
        &self.discovery
    }

    #[must_use]
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    #[must_use]
    pub fn proxies(&self) -> &ProxyBuilder {
        &self.proxies
    }

    /// Event bridge of this node; set an external emitter on it to observe events.
    #[must_use]
    pub fn event_bridge(&self) -> &Arc<BroadcastEventBridge> {
        &self.event_bridge
    }

    /// Returns a new receiver for node events.
    pub fn events(&self) -> broadcast::Receiver<MeshEvent> {
        self.event_bridge.subscribe()
    }

    /// Waits until every subscription queued so far is active at the broker.
    pub async fn ready(&self) -> MeshResult<()> {
        Ok(self.mux.flush().await?)
    }

    /// Exposes a local device for the lifetime of the node.
    pub async fn expose(&self, device: Arc<dyn DeviceController>) -> MeshResult<()> {
        let exposed = self.announcer.expose(device).await?;
        self.exposed.lock().push(exposed);
        Ok(())
    }

    /// Withdraws a previously exposed device. Returns `false` if it was not exposed.
    pub async fn withdraw(&self, name: &str) -> bool {
        let exposed = {
            let mut exposed = self.exposed.lock();
            exposed
                .iter()
                .position(|d| d.name() == name)
                .map(|index| exposed.remove(index))
        };
        match exposed {
            Some(device) => {
                device.withdraw().await;
                true
            }
            None => false,
        }
    }

    /// Asks every node in the namespace to re-announce its devices.
    pub async fn request_discovery(&self) -> MeshResult<()> {
        self.discovery.request_discovery().await?;
        self.event_bridge.emit_discovery(DiscoveryEvent::RequestSent {
            timestamp: now_millis(),
        });
        Ok(())
    }

    /// Looks up a local device or remote proxy by name.
    #[must_use]
    pub fn device(&self, name: &str) -> Option<Arc<dyn DeviceController>> {
        self.registry.get(name)
    }

    /// Invokes a command on any known device, local or remote.
    pub async fn call(&self, device: &str, command: &str, args: CommandArgs) -> MeshResult<Value> {
        let controller = self
            .registry
            .get(device)
            .ok_or_else(|| DeviceError::UnknownDevice(device.to_string()))?;
        Ok(controller.call(command, args).await?)
    }

    /// Initiates graceful shutdown.
    ///
    /// Stops building proxies, withdraws every exposed device, then releases
    /// all remaining broker subscriptions.
    pub async fn shutdown(&self) {
        log::info!("[Node] Beginning graceful shutdown...");

        self.proxies.shutdown().await;
        self.announcer.shutdown();

        let exposed: Vec<ExposedDevice> = std::mem::take(&mut *self.exposed.lock());
        let withdrawn = exposed.len();
        for device in exposed {
            device.withdraw().await;
        }
        log::info!("[Node] Withdrew {} device(s)", withdrawn);

        if let Err(e) = self.mux.flush().await {
            log::debug!("[Node] Flush during shutdown failed: {}", e);
        }
        self.mux.close();

        log::info!("[Node] Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{CommandSchema, DeviceOrigin, LocalDevice, SensorSchema, ValueType};
    use crate::events::DeviceEvent;
    use crate::mux::Subscription;
    use serde_json::json;
    use std::time::Duration;

    fn light(name: &str) -> Arc<dyn DeviceController> {
        let builder = LocalDevice::builder(name)
            .description("Dimmable light")
            .sensor(SensorSchema::new("state", ValueType::Boolean), true)
            .sensor(SensorSchema::new("brightness", ValueType::Integer), 80);
        let state = builder.sensor_cell("state").unwrap();
        Arc::new(
            builder
                .command(CommandSchema::new("toggle"), move |_args| {
                    let state = state.clone();
                    async move {
                        let next = !state.get().and_then(|v| v.as_bool()).unwrap_or(false);
                        state.set(json!(next));
                        Ok(json!(next))
                    }
                })
                .build(),
        )
    }

    fn node(broker: &LocalBroker) -> MeshNode {
        MeshNode::connect_local(MeshConfig::with_namespace("ns"), broker).unwrap()
    }

    async fn wait_discovered(events: &mut broadcast::Receiver<MeshEvent>, device: &str) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
                .await
                .unwrap()
                .unwrap();
            if let MeshEvent::Device(DeviceEvent::Discovered { name, .. }) = event {
                if name == device {
                    return;
                }
            }
        }
    }

    async fn next_topic(sub: &mut Subscription) -> String {
        tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .topic
    }

    #[tokio::test]
    async fn discovery_round_trip_between_nodes() {
        let broker = LocalBroker::new();
        let alpha = node(&broker);
        let beta = node(&broker);
        alpha.ready().await.unwrap();
        beta.ready().await.unwrap();
        let mut events = beta.events();

        alpha.expose(light("kitchen-light")).await.unwrap();
        alpha.expose(light("porch-light")).await.unwrap();
        wait_discovered(&mut events, "kitchen-light").await;
        wait_discovered(&mut events, "porch-light").await;

        // Each exposed device answers a discovery request exactly once.
        let observer = crate::test_fixtures::connect(&broker);
        let mut announcements = observer.subscribe("ns/device/+").unwrap();
        observer.flush().await.unwrap();
        beta.request_discovery().await.unwrap();
        let mut topics = vec![
            next_topic(&mut announcements).await,
            next_topic(&mut announcements).await,
        ];
        topics.sort();
        assert_eq!(topics, vec!["ns/device/kitchen-light", "ns/device/porch-light"]);
        assert_eq!(broker.published_to("ns/device/kitchen-light").len(), 2);

        // The proxy yields the announced value immediately.
        let proxy = beta.device("kitchen-light").unwrap();
        assert_eq!(beta.registry().origin("kitchen-light"), Some(DeviceOrigin::Remote));
        let mut state = proxy.watch_sensor("state").unwrap();
        assert_eq!(state.recv().await, Some(json!(true)));

        // Commands travel over RPC and the resulting change flows back.
        let reply = beta
            .call("kitchen-light", "toggle", CommandArgs::new())
            .await
            .unwrap();
        assert_eq!(reply, json!(false));
        let changed = tokio::time::timeout(Duration::from_secs(1), state.recv())
            .await
            .unwrap();
        assert_eq!(changed, Some(json!(false)));

        // A node never proxies its own devices.
        assert_eq!(alpha.registry().origin("kitchen-light"), Some(DeviceOrigin::Local));
        assert!(alpha.proxies().devices().is_empty());

        alpha.shutdown().await;
        beta.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_releases_every_subscription() {
        let broker = LocalBroker::new();
        let alpha = node(&broker);
        alpha.expose(light("desk-light")).await.unwrap();
        alpha.ready().await.unwrap();
        assert!(broker.stats().active_subscriptions > 0);

        alpha.shutdown().await;
        alpha.multiplexer().flush().await.ok();
        assert!(alpha.multiplexer().is_closed());
        assert_eq!(broker.stats().active_subscriptions, 0);
        assert!(alpha.registry().get("desk-light").is_none());
    }

    #[tokio::test]
    async fn withdraw_removes_device() {
        let broker = LocalBroker::new();
        let alpha = node(&broker);
        alpha.expose(light("lamp")).await.unwrap();

        assert!(alpha.withdraw("lamp").await);
        assert!(!alpha.withdraw("lamp").await);
        assert!(alpha.device("lamp").is_none());
    }

    #[tokio::test]
    async fn unknown_device_is_reported() {
        let broker = LocalBroker::new();
        let alpha = node(&broker);
        let err = alpha
            .call("ghost", "toggle", CommandArgs::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unknown_device");
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let broker = LocalBroker::new();
        let result = MeshNode::connect_local(MeshConfig::with_namespace("a/#"), &broker);
        assert!(matches!(result, Err(crate::error::MeshError::Config(_))));
    }
}
