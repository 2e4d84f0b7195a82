//! Frame Protocol
//!
//! Wire format for simulation requests and responses: a length prefix followed
//! by exactly that many bytes of UTF-8 JSON.
//!
//! # Frame Format
//!
//! ```text
//! +----------------+------------------------------------------+
//! | Length (4)     | JSON Payload (variable)                  |
//! | big-endian u32 | Request or Response                      |
//! +----------------+------------------------------------------+
//! ```
//!
//! The length is the only boundary marker. Message boundaries are never
//! inferred from how many bytes a single `read` happened to return, nor from
//! whether a prefix of the buffer already parses as JSON.
//!
//! # Limits
//!
//! - Maximum frame size is enforced on both encode and decode
//! - Length field is validated before allocating the payload buffer

use std::io::{self, Read};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Default maximum frame size (10 MiB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Frame header size: 4 bytes of big-endian length
pub const HEADER_SIZE: usize = 4;

/// Errors produced while encoding or decoding a frame
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream ended before the 4-byte length prefix was complete
    #[error("stream closed after {received} of 4 header bytes")]
    IncompleteHeader {
        /// Header bytes received before the stream closed
        received: usize,
    },

    /// The stream ended before the announced payload length was reached
    #[error("stream closed after {received} of {expected} payload bytes")]
    TruncatedBody {
        /// Payload length announced by the header
        expected: usize,
        /// Payload bytes actually received
        received: usize,
    },

    /// The payload is not valid JSON for the expected message type
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// The payload exceeds the configured maximum
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Size of the offending payload
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// The underlying stream reported an error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Whether the error means the peer went away mid-frame
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::IncompleteHeader { .. } | Self::TruncatedBody { .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::NotConnected
            ),
            Self::MalformedPayload(_) | Self::FrameTooLarge { .. } => false,
        }
    }
}

/// Encode a message to a length-prefixed frame
///
/// # Errors
///
/// Returns [`FrameError::MalformedPayload`] if JSON serialization fails and
/// [`FrameError::FrameTooLarge`] if the payload exceeds `max_size`.
pub fn encode_with_limit<T: Serialize>(msg: &T, max_size: usize) -> Result<Vec<u8>, FrameError> {
    let json = serde_json::to_vec(msg)?;

    if json.len() > max_size {
        return Err(FrameError::FrameTooLarge {
            size: json.len(),
            max: max_size,
        });
    }

    let len = u32::try_from(json.len()).map_err(|_| FrameError::FrameTooLarge {
        size: json.len(),
        max: max_size,
    })?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

/// Encode a message using [`MAX_FRAME_SIZE`]
///
/// # Errors
///
/// See [`encode_with_limit`].
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, FrameError> {
    encode_with_limit(msg, MAX_FRAME_SIZE)
}

/// Read one frame's raw payload from a blocking stream
///
/// Reads the 4-byte prefix, then exactly that many bytes. Short reads are
/// accumulated, so the result does not depend on how the bytes were chunked.
///
/// # Errors
///
/// - [`FrameError::IncompleteHeader`] if the stream ends inside the prefix
/// - [`FrameError::FrameTooLarge`] if the prefix exceeds `max_size`
/// - [`FrameError::TruncatedBody`] if the stream ends inside the payload
/// - [`FrameError::Io`] for any other read failure
pub fn read_frame<R: Read + ?Sized>(reader: &mut R, max_size: usize) -> Result<Vec<u8>, FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    let got = read_full(reader, &mut header)?;
    if got < HEADER_SIZE {
        return Err(FrameError::IncompleteHeader { received: got });
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_size {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: max_size,
        });
    }

    let mut payload = vec![0u8; len];
    let got = read_full(reader, &mut payload)?;
    if got < len {
        return Err(FrameError::TruncatedBody {
            expected: len,
            received: got,
        });
    }

    Ok(payload)
}

/// Decode exactly one message from a blocking stream
///
/// # Errors
///
/// Everything [`read_frame`] returns, plus [`FrameError::MalformedPayload`]
/// when the payload does not parse as `T`.
pub fn decode_with_limit<T, R>(reader: &mut R, max_size: usize) -> Result<T, FrameError>
where
    T: DeserializeOwned,
    R: Read + ?Sized,
{
    let payload = read_frame(reader, max_size)?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Decode one message using [`MAX_FRAME_SIZE`]
///
/// # Errors
///
/// See [`decode_with_limit`].
pub fn decode<T, R>(reader: &mut R) -> Result<T, FrameError>
where
    T: DeserializeOwned,
    R: Read + ?Sized,
{
    decode_with_limit(reader, MAX_FRAME_SIZE)
}

/// Fill `buf` as far as the stream allows
///
/// Returns the number of bytes read; less than `buf.len()` only at EOF.
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
