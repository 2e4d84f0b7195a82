//! TCP Transport
//!
//! Blocking server side of the simulation connection. The transport binds a
//! listener, accepts exactly one peer, then exchanges frames with it until
//! [`TcpTransport::teardown`] releases both sockets.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::cancel::CancelHandle;
use super::config::TransportConfig;
use super::frame::{self, FrameError};
use super::TransportError;

/// Poll interval for accept when an accept deadline is configured
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Blocking TCP transport to a single simulation peer
#[derive(Debug)]
pub struct TcpTransport {
    config: TransportConfig,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    cancel: CancelHandle,
}

impl TcpTransport {
    /// Create an idle transport
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            listener: None,
            stream: None,
            peer: None,
            cancel: CancelHandle::new(),
        }
    }

    /// The transport configuration
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Handle that aborts blocking calls from another thread
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Whether a listening socket is open
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Whether a peer is connected
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Address the listener is bound to
    ///
    /// Useful after binding port 0.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Address of the connected peer
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Open a listening socket on `host:port`
    ///
    /// # Errors
    ///
    /// - [`TransportError::InvalidState`] if already listening
    /// - [`TransportError::Bind`] if the address is unavailable
    pub fn listen(&mut self, host: &str, port: u16) -> Result<SocketAddr, TransportError> {
        if self.listener.is_some() {
            return Err(TransportError::InvalidState("already listening"));
        }
        if self.cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let listener = TcpListener::bind((host, port)).map_err(|source| TransportError::Bind {
            addr: format!("{host}:{port}"),
            source,
        })?;
        let addr = listener.local_addr()?;
        self.cancel.attach_listener(addr);
        self.listener = Some(listener);

        tracing::info!(%addr, "Listening for simulation");
        Ok(addr)
    }

    /// Block until the simulation connects
    ///
    /// Waits forever unless an accept deadline is configured.
    ///
    /// # Errors
    ///
    /// - [`TransportError::InvalidState`] if not listening or already connected
    /// - [`TransportError::Timeout`] if the accept deadline expires
    /// - [`TransportError::Cancelled`] if the cancel handle fires
    pub fn accept_once(&mut self) -> Result<SocketAddr, TransportError> {
        if self.stream.is_some() {
            return Err(TransportError::InvalidState("already connected"));
        }
        let listener = self
            .listener
            .as_ref()
            .ok_or(TransportError::InvalidState("not listening"))?;
        if self.cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let (stream, peer) = match self.config.accept_timeout {
            None => accept_blocking(listener)?,
            Some(timeout) => accept_with_deadline(listener, timeout, &self.cancel)?,
        };

        // A connection made by CancelHandle::cancel to wake us up
        if self.cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        stream.set_nonblocking(false)?;
        stream.set_nodelay(self.config.nodelay)?;
        stream.set_read_timeout(self.config.read_timeout)?;
        stream.set_write_timeout(self.config.write_timeout)?;
        self.cancel.attach_stream(stream.try_clone()?);

        tracing::info!(%peer, "Simulation connected");
        self.stream = Some(stream);
        self.peer = Some(peer);
        Ok(peer)
    }

    /// Serialize `msg` and write it as one frame
    ///
    /// # Errors
    ///
    /// - [`TransportError::InvalidState`] if no peer is connected
    /// - [`TransportError::Frame`] if the message cannot be encoded
    /// - [`TransportError::ConnectionLost`] if the write fails
    pub fn send<T: Serialize>(&mut self, msg: &T) -> Result<(), TransportError> {
        let bytes = frame::encode_with_limit(msg, self.config.max_frame_size)?;
        self.send_frame(&bytes)
    }

    /// Write an already-encoded frame
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send), minus encoding.
    pub fn send_frame(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let write_timeout = self.config.write_timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or(TransportError::InvalidState("not connected"))?;
        if self.cancel.is_cancelled() {
            return Err(TransportError::ConnectionLost {
                reason: "cancelled".into(),
            });
        }

        stream
            .write_all(bytes)
            .and_then(|()| stream.flush())
            .map_err(|e| match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout {
                    operation: "send",
                    after: write_timeout.unwrap_or_default(),
                },
                _ => TransportError::ConnectionLost {
                    reason: e.to_string(),
                },
            })?;

        tracing::trace!(bytes = bytes.len(), "Frame sent");
        Ok(())
    }

    /// Block until one complete frame arrives and decode it
    ///
    /// # Errors
    ///
    /// - [`TransportError::InvalidState`] if no peer is connected
    /// - [`TransportError::ConnectionLost`] if the peer closes mid-frame
    /// - [`TransportError::Timeout`] if the read deadline expires
    /// - [`TransportError::Frame`] for oversized or malformed frames
    pub fn receive<T: DeserializeOwned>(&mut self) -> Result<T, TransportError> {
        let bytes = self.receive_frame()?;
        Ok(serde_json::from_slice(&bytes).map_err(FrameError::from)?)
    }

    /// Block until one complete frame arrives and return its payload
    ///
    /// # Errors
    ///
    /// Same as [`receive`](Self::receive), minus decoding.
    pub fn receive_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let read_timeout = self.config.read_timeout;
        let max = self.config.max_frame_size;
        let stream = self
            .stream
            .as_mut()
            .ok_or(TransportError::InvalidState("not connected"))?;

        match frame::read_frame(stream, max) {
            Ok(payload) => {
                tracing::trace!(bytes = payload.len(), "Frame received");
                Ok(payload)
            }
            Err(e) if self.cancel.is_cancelled() => Err(TransportError::ConnectionLost {
                reason: format!("cancelled ({e})"),
            }),
            Err(FrameError::Io(e))
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                Err(TransportError::Timeout {
                    operation: "receive",
                    after: read_timeout.unwrap_or_default(),
                })
            }
            Err(e) if e.is_disconnect() => Err(TransportError::ConnectionLost {
                reason: e.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Close the connection and the listener
    ///
    /// Idempotent. Afterwards the port is free and `listen` may be called again.
    pub fn teardown(&mut self) {
        self.cancel.detach_stream();
        self.cancel.detach_listener();

        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                tracing::debug!(error = %e, "Stream already closed");
            }
            tracing::debug!(peer = ?self.peer, "Connection closed");
        }
        self.peer = None;

        if let Some(listener) = self.listener.take() {
            tracing::debug!(addr = ?listener.local_addr().ok(), "Listener closed");
        }
    }
}

fn accept_blocking(listener: &TcpListener) -> Result<(TcpStream, SocketAddr), TransportError> {
    loop {
        match listener.accept() {
            Ok(accepted) => return Ok(accepted),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn accept_with_deadline(
    listener: &TcpListener,
    timeout: Duration,
    cancel: &CancelHandle,
) -> Result<(TcpStream, SocketAddr), TransportError> {
    let deadline = Instant::now() + timeout;
    listener.set_nonblocking(true)?;

    let result = loop {
        match listener.accept() {
            Ok(accepted) => break Ok(accepted),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                if cancel.is_cancelled() {
                    break Err(TransportError::Cancelled);
                }
                if Instant::now() >= deadline {
                    break Err(TransportError::Timeout {
                        operation: "accept",
                        after: timeout,
                    });
                }
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => break Err(e.into()),
        }
    };

    listener.set_nonblocking(false)?;
    result
}
