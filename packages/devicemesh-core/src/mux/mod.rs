//! Topic multiplexing over a single transport connection.
//!
//! - `topic` - Filter grammar, validation and matching
//! - `multiplexer` - Refcounted filter table, broker task and dispatcher
//! - `subscription` - Per-caller cancellable message streams

mod multiplexer;
mod subscription;
pub mod topic;

pub use multiplexer::{MuxError, MuxResult, TopicMultiplexer};
pub use subscription::{Delivery, Subscription, TopicMessage};
pub use topic::TopicError;
