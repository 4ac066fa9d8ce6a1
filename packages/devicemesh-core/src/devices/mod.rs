//! Device abstraction shared by local devices and remote proxies.
//!
//! - `controller` - [`DeviceController`] trait, schemas and [`DeviceError`]
//! - `local` - [`LocalDevice`] with builder-based registration
//! - `registry` - [`DeviceRegistry`], the per-node name table

mod controller;
mod local;
mod registry;

pub use controller::{
    CommandArgs, CommandParameter, CommandSchema, DeviceController, DeviceError, DeviceResult,
    SensorSchema, ValueType,
};
pub use local::{LocalDevice, LocalDeviceBuilder};
pub use registry::{DeviceOrigin, DeviceRegistry};
