//! Transport Configuration
//!
//! Deadlines and limits for the simulation socket. Every deadline is
//! optional; with none set the transport blocks without bound.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::frame::MAX_FRAME_SIZE;

/// Transport configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// How long to wait for the simulation to connect (None = forever)
    pub accept_timeout: Option<Duration>,

    /// How long to wait for a response frame (None = forever)
    pub read_timeout: Option<Duration>,

    /// How long a single write may block (None = forever)
    pub write_timeout: Option<Duration>,

    /// Largest frame accepted in either direction
    pub max_frame_size: usize,

    /// Disable Nagle's algorithm on the accepted stream
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            accept_timeout: None,
            read_timeout: None,
            write_timeout: None,
            max_frame_size: MAX_FRAME_SIZE,
            nodelay: true,
        }
    }
}

impl TransportConfig {
    /// Fully blocking configuration
    #[must_use]
    pub fn blocking() -> Self {
        Self::default()
    }

    /// Set the accept deadline
    #[must_use]
    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = Some(timeout);
        self
    }

    /// Set the response deadline
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the write deadline
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Whether any deadline is configured
    #[must_use]
    pub fn has_deadlines(&self) -> bool {
        self.accept_timeout.is_some() || self.read_timeout.is_some() || self.write_timeout.is_some()
    }
}

/// Interpret a millisecond setting where 0 means "no deadline"
#[must_use]
pub fn millis_to_deadline(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
