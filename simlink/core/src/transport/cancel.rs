//! Cancellation Handle
//!
//! Transport calls block the calling thread. A [`CancelHandle`] lets another
//! thread abort them:
//!
//! - a blocked receive sees its stream shut down and fails with `ConnectionLost`
//! - a blocked accept is woken by a loopback connection and fails with `Cancelled`
//!
//! Cancellation is sticky: once cancelled, the transport refuses further work.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// How long a wake-up connection may take before it is abandoned
const WAKE_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Sockets the handle can reach from another thread
#[derive(Debug, Default)]
struct Targets {
    /// Address of the listening socket, if listening
    listen_addr: Option<SocketAddr>,
    /// Clone of the connected stream, if connected
    stream: Option<TcpStream>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    targets: Mutex<Targets>,
}

/// Cloneable, thread-safe handle that aborts blocking transport calls
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

impl CancelHandle {
    /// Create a handle with nothing attached
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort any blocking transport call
    ///
    /// Safe to call from any thread, any number of times.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        let targets = self.inner.targets.lock();
        if let Some(stream) = &targets.stream {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                tracing::debug!(error = %e, "Stream already closed while cancelling");
            }
        }
        if let Some(addr) = targets.listen_addr {
            // The accepted connection is recognised as a wake-up by the flag
            // and dropped immediately.
            let addr = reachable(addr);
            if let Err(e) = TcpStream::connect_timeout(&addr, WAKE_CONNECT_TIMEOUT) {
                tracing::debug!(error = %e, %addr, "Failed to wake accept");
            }
        }
        tracing::info!("Transport cancelled");
    }

    /// Whether [`cancel`](Self::cancel) has been called
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn attach_listener(&self, addr: SocketAddr) {
        self.inner.targets.lock().listen_addr = Some(addr);
    }

    pub(crate) fn detach_listener(&self) {
        self.inner.targets.lock().listen_addr = None;
    }

    pub(crate) fn attach_stream(&self, stream: TcpStream) {
        self.inner.targets.lock().stream = Some(stream);
    }

    pub(crate) fn detach_stream(&self) {
        self.inner.targets.lock().stream = None;
    }
}

/// Map a wildcard bind address to loopback so it can be connected to
fn reachable(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}
