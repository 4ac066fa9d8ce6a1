//! Name-keyed table of every device known to this node.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use super::controller::DeviceController;

/// Where a registered device is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceOrigin {
    /// Implemented in this process and exposed to the mesh.
    Local,
    /// Proxy projected from a remote announcement.
    Remote,
}

struct RegisteredDevice {
    controller: Arc<dyn DeviceController>,
    origin: DeviceOrigin,
}

/// Registry of local devices and remote proxies.
///
/// Names are unique across both kinds. The first registration of a name wins;
/// later attempts leave the existing entry untouched.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<DashMap<String, RegisteredDevice>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `controller` under its own name.
    ///
    /// Returns `false` if the name was already taken.
    pub fn register(&self, controller: Arc<dyn DeviceController>, origin: DeviceOrigin) -> bool {
        let name = controller.name().to_string();
        self.register_with(&name, origin, || controller).is_some()
    }

    /// Registers the controller built by `make`, calling it only if `name` is
    /// free. The check and the insert are atomic.
    ///
    /// Returns the new controller, or `None` if the name was already taken.
    pub fn register_with<F>(
        &self,
        name: &str,
        origin: DeviceOrigin,
        make: F,
    ) -> Option<Arc<dyn DeviceController>>
    where
        F: FnOnce() -> Arc<dyn DeviceController>,
    {
        match self.devices.entry(name.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let controller = make();
                slot.insert(RegisteredDevice {
                    controller: Arc::clone(&controller),
                    origin,
                });
                log::debug!("[Registry] Registered {:?} device '{}'", origin, name);
                Some(controller)
            }
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn DeviceController>> {
        self.devices.get(name).map(|d| Arc::clone(&d.controller))
    }

    #[must_use]
    pub fn origin(&self, name: &str) -> Option<DeviceOrigin> {
        self.devices.get(name).map(|d| d.origin)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    /// Removes a device, returning its controller.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn DeviceController>> {
        self.devices.remove(name).map(|(_, d)| d.controller)
    }

    /// Names of all registered devices, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.devices.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Controllers of the given origin, sorted by name.
    #[must_use]
    pub fn devices(&self, origin: DeviceOrigin) -> Vec<Arc<dyn DeviceController>> {
        let mut devices: Vec<_> = self
            .devices
            .iter()
            .filter(|e| e.origin == origin)
            .map(|e| (e.key().clone(), Arc::clone(&e.controller)))
            .collect();
        devices.sort_by(|a, b| a.0.cmp(&b.0));
        devices.into_iter().map(|(_, c)| c).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
