//! Turns announcements into device proxies.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::devices::{DeviceController, DeviceOrigin, DeviceRegistry};
use crate::discovery::{DeviceAnnouncement, DiscoveryService};
use crate::events::{DeviceEvent, EventEmitter};
use crate::mux::MuxResult;
use crate::runtime::TokioSpawner;
use crate::utils::now_millis;

use super::remote::RemoteDevice;

/// Dependencies shared by the announcement loop and direct callers.
#[derive(Clone)]
struct ProxyContext {
    discovery: DiscoveryService,
    registry: DeviceRegistry,
    emitter: Arc<dyn EventEmitter>,
    spawner: TokioSpawner,
    command_timeout: Duration,
}

impl ProxyContext {
    /// Creates a proxy for an unknown name; ignores known names.
    fn accept(&self, announcement: DeviceAnnouncement) -> Option<Arc<dyn DeviceController>> {
        let name = announcement.name.clone();
        let (sensors, commands) = (announcement.sensors.len(), announcement.commands.len());

        let created = self.registry.register_with(&name, DeviceOrigin::Remote, || {
            Arc::new(RemoteDevice::from_announcement(
                announcement,
                self.discovery.clone(),
                self.command_timeout,
                &self.spawner,
            ))
        });

        match created {
            Some(proxy) => {
                log::info!(
                    "[Proxy] Discovered '{}' ({} sensors, {} commands)",
                    name,
                    sensors,
                    commands
                );
                self.emitter.emit_device(DeviceEvent::Discovered {
                    name,
                    sensors,
                    commands,
                    timestamp: now_millis(),
                });
                Some(proxy)
            }
            None if self.registry.origin(&name) == Some(DeviceOrigin::Local) => {
                log::trace!("[Proxy] Skipping own device '{}'", name);
                None
            }
            None => {
                log::debug!("[Proxy] Ignoring re-announcement of '{}'", name);
                self.emitter.emit_device(DeviceEvent::AnnouncementIgnored {
                    name,
                    timestamp: now_millis(),
                });
                None
            }
        }
    }
}

/// Builds a proxy for every remote device announced in the namespace.
///
/// The first announcement of a name is authoritative. Proxies live in the
/// node's [`DeviceRegistry`] for the rest of the process lifetime.
pub struct ProxyBuilder {
    context: ProxyContext,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyBuilder {
    /// Subscribes to announcements and starts building proxies.
    ///
    /// # Arguments
    /// * `discovery` - Source of announcements; proxies call commands through it
    /// * `registry` - Receives proxies; also decides which names are known
    /// * `emitter` - Receives `Discovered` and `AnnouncementIgnored` events
    /// * `spawner` - Runs the announcement loop and per-sensor trackers
    /// * `command_timeout` - Deadline for commands invoked through proxies
    pub fn start(
        discovery: DiscoveryService,
        registry: DeviceRegistry,
        emitter: Arc<dyn EventEmitter>,
        spawner: TokioSpawner,
        command_timeout: Duration,
    ) -> MuxResult<Self> {
        let mut announcements = discovery.announcements()?;
        let context = ProxyContext {
            discovery,
            registry,
            emitter,
            spawner: spawner.clone(),
            command_timeout,
        };
        let cancel = CancellationToken::new();

        let loop_context = context.clone();
        let loop_cancel = cancel.clone();
        let task = spawner.spawn_tracked(async move {
            loop {
                let announcement = tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    announcement = announcements.next() => announcement,
                };
                match announcement {
                    Some(announcement) => {
                        loop_context.accept(announcement);
                    }
                    None => break,
                }
            }
            log::debug!("[Proxy] Announcement loop stopped");
        });

        Ok(Self {
            context,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Handles one announcement as if it had arrived from the mesh.
    ///
    /// Returns the new proxy, or `None` if the name was already known.
    pub fn accept(&self, announcement: DeviceAnnouncement) -> Option<Arc<dyn DeviceController>> {
        self.context.accept(announcement)
    }

    /// Returns the proxy for a remote device.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn DeviceController>> {
        match self.context.registry.origin(name) {
            Some(DeviceOrigin::Remote) => self.context.registry.get(name),
            _ => None,
        }
    }

    /// All proxies, sorted by name.
    #[must_use]
    pub fn devices(&self) -> Vec<Arc<dyn DeviceController>> {
        self.context.registry.devices(DeviceOrigin::Remote)
    }

    /// Stops consuming announcements and waits for the loop to exit.
    ///
    /// Existing proxies stay registered.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                log::warn!("[Proxy] Announcement loop failed: {}", e);
            }
        }
    }
}

impl Drop for ProxyBuilder {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
