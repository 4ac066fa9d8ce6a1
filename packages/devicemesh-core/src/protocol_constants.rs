//! Protocol and tuning constants.
//!
//! Wire-level names live here so every component builds topics and envelopes
//! from the same definitions.

// ─────────────────────────────────────────────────────────────────────────────
// Topic Layout
// ─────────────────────────────────────────────────────────────────────────────

/// Default namespace prefixed to every topic.
pub const DEFAULT_NAMESPACE: &str = "devicemesh";

/// Level under the namespace that carries discovery requests.
pub const DISCOVERY_LEVEL: &str = "discovery";

/// Level under the namespace that carries device announcements.
pub const DEVICE_LEVEL: &str = "device";

/// Level under a device topic that carries sensor values.
pub const SENSOR_LEVEL: &str = "sensor";

/// Trailing level of a sensor value topic.
pub const VALUE_LEVEL: &str = "value";

/// Level under a device topic that carries command requests.
pub const COMMAND_LEVEL: &str = "command";

/// Levels under the namespace used for generated RPC response topics.
pub const RESPONSE_LEVELS: &str = "rpc/response";

// ─────────────────────────────────────────────────────────────────────────────
// RPC
// ─────────────────────────────────────────────────────────────────────────────

/// Default timeout for commands invoked on remote device proxies (milliseconds).
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5000;

/// Key of the error object published when a handler fails.
pub const ERROR_KEY: &str = "error";

// ─────────────────────────────────────────────────────────────────────────────
// Channels
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of the domain event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Number of publishes the loopback broker keeps for inspection.
pub const LOCAL_BROKER_HISTORY_LEN: usize = 1024;
