//! Discovery protocol.
//!
//! - `topics` - Topic layout under a namespace
//! - `announcement` - Device announcement payload
//! - `service` - [`DiscoveryService`]: announce, request, watch and call
//! - `announcer` - [`Announcer`]: exposes local devices

mod announcement;
mod announcer;
mod service;
mod topics;

pub use announcement::{AnnouncedSensor, DeviceAnnouncement};
pub use announcer::{Announcer, ExposedDevice};
pub use service::{
    AnnouncementStream, DiscoveryError, DiscoveryResult, DiscoveryService, SensorValueStream,
};
pub use topics::Topics;
