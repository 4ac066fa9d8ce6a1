//! Exposes local devices to the mesh.
//!
//! For every exposed device the announcer:
//! - publishes its announcement once on registration,
//! - re-publishes it on every discovery request,
//! - publishes each sensor change on its value topic,
//! - serves each command on its command topic.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::devices::{CommandArgs, DeviceController, DeviceOrigin, DeviceRegistry};
use crate::events::{DeviceEvent, DiscoveryEvent, EventEmitter};
use crate::mux::topic;
use crate::rpc::{HandlerError, HandlerRegistration, RequestHandler};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::utils::now_millis;

use super::service::{DiscoveryError, DiscoveryResult, DiscoveryService};

type ExposedTable = DashMap<String, Arc<dyn DeviceController>>;

/// Publishes and serves the local devices of one node.
pub struct Announcer {
    discovery: DiscoveryService,
    registry: DeviceRegistry,
    emitter: Arc<dyn EventEmitter>,
    spawner: TokioSpawner,
    exposed: Arc<ExposedTable>,
    cancel: CancellationToken,
}

impl Announcer {
    /// Creates an announcer and starts answering discovery requests.
    ///
    /// # Arguments
    /// * `discovery` - Discovery operations for the node's namespace
    /// * `registry` - Node registry; exposed devices are registered as local
    /// * `emitter` - Receives `Exposed` and `RequestAnswered` events
    /// * `spawner` - Runs the request loop and sensor forwarders
    pub fn new(
        discovery: DiscoveryService,
        registry: DeviceRegistry,
        emitter: Arc<dyn EventEmitter>,
        spawner: TokioSpawner,
    ) -> DiscoveryResult<Self> {
        let exposed: Arc<ExposedTable> = Arc::new(DashMap::new());
        let cancel = CancellationToken::new();
        let mut requests = discovery.discovery_requests()?;

        let loop_discovery = discovery.clone();
        let loop_exposed = Arc::clone(&exposed);
        let loop_emitter = Arc::clone(&emitter);
        spawner.spawn_until(cancel.clone(), async move {
            while let Some(delivery) = requests.recv().await {
                if let Err(e) = delivery {
                    log::warn!("[Announcer] Discovery request stream failed: {}", e);
                    break;
                }
                let announced = announce_all(&loop_discovery, &loop_exposed).await;
                loop_emitter.emit_discovery(DiscoveryEvent::RequestAnswered {
                    announced,
                    timestamp: now_millis(),
                });
            }
            log::debug!("[Announcer] Discovery request loop stopped");
        });

        Ok(Self {
            discovery,
            registry,
            emitter,
            spawner,
            exposed,
            cancel,
        })
    }

    /// Exposes `device` until the returned handle is withdrawn or dropped.
    ///
    /// Fails if the name cannot be used as a topic level or is already taken
    /// by another device on this node.
    pub async fn expose(&self, device: Arc<dyn DeviceController>) -> DiscoveryResult<ExposedDevice> {
        let name = device.name().to_string();
        topic::validate_level(&name)?;
        if !self.registry.register(Arc::clone(&device), DeviceOrigin::Local) {
            return Err(DiscoveryError::NameTaken(name));
        }

        let mut exposed = ExposedDevice {
            name: name.clone(),
            cancel: self.cancel.child_token(),
            registrations: Vec::new(),
            table: Arc::clone(&self.exposed),
            registry: self.registry.clone(),
        };

        for command in device.commands() {
            let handler = CommandHandler {
                device: Arc::clone(&device),
                command: command.name.clone(),
            };
            exposed
                .registrations
                .push(self.discovery.serve_command(&name, &command.name, handler)?);
        }

        for sensor in device.sensors() {
            topic::validate_level(&sensor.name)?;
            let mut watch = match device.watch_sensor(&sensor.name) {
                Ok(watch) => watch,
                Err(e) => {
                    log::warn!("[Announcer] Cannot watch {}.{}: {}", name, sensor.name, e);
                    continue;
                }
            };
            // The announcement carries the current value; only changes go out.
            let mut skip_replay = watch.replays_latest();
            let discovery = self.discovery.clone();
            let device_name = name.clone();
            self.spawner.spawn_until(exposed.cancel.clone(), async move {
                while let Some(value) = watch.recv().await {
                    if std::mem::take(&mut skip_replay) {
                        continue;
                    }
                    if let Err(e) = discovery
                        .publish_sensor_value(&device_name, &sensor.name, &value)
                        .await
                    {
                        log::warn!(
                            "[Announcer] Failed to publish {}.{}: {}",
                            device_name,
                            sensor.name,
                            e
                        );
                    }
                }
            });
        }

        self.exposed.insert(name.clone(), Arc::clone(&device));
        self.discovery.announce(device.as_ref()).await?;

        log::info!("[Announcer] Exposed '{}'", name);
        self.emitter.emit_device(DeviceEvent::Exposed {
            name,
            timestamp: now_millis(),
        });
        Ok(exposed)
    }

    /// Names of the currently exposed devices, sorted.
    #[must_use]
    pub fn exposed_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.exposed.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Stops answering discovery requests and forwarding sensors.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Announcer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn announce_all(discovery: &DiscoveryService, exposed: &ExposedTable) -> usize {
    let devices: Vec<Arc<dyn DeviceController>> =
        exposed.iter().map(|e| Arc::clone(e.value())).collect();

    let mut announced = 0;
    for device in devices {
        match discovery.announce(device.as_ref()).await {
            Ok(()) => announced += 1,
            Err(e) => log::warn!("[Announcer] Failed to announce '{}': {}", device.name(), e),
        }
    }
    announced
}

/// Serves one command of a local device.
struct CommandHandler {
    device: Arc<dyn DeviceController>,
    command: String,
}

#[async_trait]
impl RequestHandler for CommandHandler {
    async fn handle(&self, body: String) -> Result<String, HandlerError> {
        let args = parse_args(&body)?;
        let result = self.device.call(&self.command, args).await?;
        Ok(result.to_string())
    }
}

/// Named arguments from a request body. An empty body means no arguments.
fn parse_args(body: &str) -> Result<CommandArgs, HandlerError> {
    if body.trim().is_empty() {
        return Ok(CommandArgs::new());
    }
    match serde_json::from_str::<Value>(body)? {
        Value::Object(args) => Ok(args),
        Value::Null => Ok(CommandArgs::new()),
        _ => Err(HandlerError::new("command arguments must be a JSON object")),
    }
}

/// A device exposed through an [`Announcer`].
///
/// Withdrawing (or dropping) stops serving its commands and forwarding its
/// sensors, and frees its name in the registry.
pub struct ExposedDevice {
    name: String,
    cancel: CancellationToken,
    registrations: Vec<HandlerRegistration>,
    table: Arc<ExposedTable>,
    registry: DeviceRegistry,
}

impl ExposedDevice {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Withdraws the device and waits until its command topics are released.
    pub async fn withdraw(mut self) {
        self.release();
        for registration in std::mem::take(&mut self.registrations) {
            registration.shutdown().await;
        }
    }

    fn release(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.table.remove(&self.name);
        self.registry.remove(&self.name);
        log::info!("[Announcer] Withdrew '{}'", self.name);
    }
}

impl Drop for ExposedDevice {
    fn drop(&mut self) {
        self.release();
    }
}
