//! Remote device proxies.
//!
//! - `remote` - [`RemoteDevice`]: a [`DeviceController`](crate::devices::DeviceController) backed by topics
//! - `builder` - [`ProxyBuilder`]: consumes announcements, first writer wins

mod builder;
mod remote;

pub use builder::ProxyBuilder;
pub use remote::RemoteDevice;
