//! Transport Layer for Simulation IPC
//!
//! The driver is the TCP *server*; the launched simulation connects back to
//! it as the single client. Traffic is strict request/response over
//! length-prefixed JSON frames (see [`frame`]).
//!
//! - [`TcpTransport`]: listen, accept one peer, send and receive frames
//! - [`CancelHandle`]: abort a blocked accept or receive from another thread
//! - [`TransportConfig`]: optional deadlines and the frame size limit
//!
//! All calls block the calling thread. There is no async runtime here.

pub mod cancel;
pub mod config;
pub mod frame;
pub mod tcp;

use std::io;
use std::time::Duration;

use thiserror::Error;

// Re-exports for convenience
pub use cancel::CancelHandle;
pub use config::TransportConfig;
pub use frame::{FrameError, MAX_FRAME_SIZE};
pub use tcp::TcpTransport;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// The listening socket could not be created
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The peer closed the connection or the socket failed mid-exchange
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// What the socket reported
        reason: String,
    },

    /// A frame could not be encoded or decoded
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A configured deadline expired
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
        /// The deadline that expired
        after: Duration,
    },

    /// The operation was aborted through a [`CancelHandle`]
    #[error("transport cancelled")]
    Cancelled,

    /// The call is not valid in the transport's current state
    #[error("invalid transport state: {0}")]
    InvalidState(&'static str),

    /// Socket setup failed outside of a frame exchange
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether the connection to the peer is gone for good
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. } | Self::Cancelled)
    }
}
