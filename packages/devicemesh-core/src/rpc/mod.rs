//! Request/response on top of publish/subscribe.
//!
//! - `envelope` - Request envelope and reply formats
//! - `client` - [`RpcClient`]: per-call response topics, timeouts, cancellation
//! - `server` - [`RpcServer`]: binds handlers to fixed request topics

mod client;
pub mod envelope;
mod server;

pub use client::{CallHandle, RpcClient};
pub use envelope::{parse_response, Envelope, ErrorReply};
pub use server::{HandlerError, HandlerRegistration, RequestHandler, RpcServer};

use thiserror::Error;

use crate::mux::MuxError;
use crate::transport::TransportError;

/// Errors produced by RPC calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// No reply arrived before the deadline.
    #[error("no response from '{topic}' within {timeout_ms}ms")]
    Timeout {
        /// Destination topic of the request.
        topic: String,
        /// Deadline that elapsed.
        timeout_ms: u64,
    },

    /// The remote handler failed. Only its message crosses the wire.
    #[error("{0}")]
    Application(String),

    /// Broker-level failure on the request or response path.
    #[error(transparent)]
    Transport(TransportError),

    /// Destination topic cannot be published to.
    #[error("invalid request topic: {0}")]
    InvalidTopic(String),

    /// Reply could not be interpreted.
    #[error("malformed response: {0}")]
    Protocol(String),

    /// The caller cancelled the call before it completed.
    #[error("call cancelled")]
    Cancelled,

    /// The underlying multiplexer is closed.
    #[error("multiplexer is closed")]
    Closed,
}

impl From<MuxError> for RpcError {
    fn from(err: MuxError) -> Self {
        match err {
            MuxError::Transport(e) => Self::Transport(e),
            MuxError::Closed => Self::Closed,
            MuxError::InvalidFilter(e) | MuxError::InvalidTopic(e) => {
                Self::InvalidTopic(e.to_string())
            }
        }
    }
}

impl RpcError {
    /// Returns whether the error is a deadline expiry.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Convenient Result alias for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;
