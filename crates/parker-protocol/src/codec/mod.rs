//! Length-prefixed JSON framing.
//!
//! A frame is a 4-byte big-endian unsigned length followed by that many bytes
//! of UTF-8 JSON. Frames longer than [`MAX_FRAME_LEN`] are refused on both
//! the read and the write side.

use std::io::{self, Read, Write};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Largest accepted frame body in bytes.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const HEADER_LEN: usize = 4;

/// Errors raised while reading or writing frames.
#[derive(Debug, Clone, Error)]
pub enum FrameError {
    /// The peer closed the stream before a frame header arrived.
    #[error("connection closed")]
    Closed,
    /// The stream failed, timed out, or ended inside a frame.
    #[error("frame I/O failed: {source}")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The declared or encoded length exceeds [`MAX_FRAME_LEN`].
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    Oversize {
        /// Offending length.
        len: usize,
        /// Configured limit.
        max: usize,
    },
    /// The frame body was not the expected JSON.
    #[error("frame body is not valid JSON: {source}")]
    Decode {
        /// Underlying parse error.
        #[source]
        source: Arc<serde_json::Error>,
    },
    /// The value could not be encoded as JSON.
    #[error("failed to encode frame: {source}")]
    Encode {
        /// Underlying serialisation error.
        #[source]
        source: Arc<serde_json::Error>,
    },
}

impl FrameError {
    /// Returns true when the error stems from a read or write deadline.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Io { source } => matches!(
                source.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    fn io(source: io::Error) -> Self {
        Self::Io {
            source: Arc::new(source),
        }
    }
}

/// Reads one frame and decodes its JSON body.
///
/// # Errors
///
/// Returns [`FrameError::Closed`] on a clean end of stream before the header,
/// [`FrameError::Oversize`] when the declared length exceeds the limit,
/// [`FrameError::Io`] on transport failures, and [`FrameError::Decode`] when
/// the body does not decode as `T`.
pub fn read_frame<T, R>(reader: &mut R) -> Result<T, FrameError>
where
    T: DeserializeOwned,
    R: Read + ?Sized,
{
    let mut header = [0_u8; HEADER_LEN];
    read_header(reader, &mut header)?;
    let len = decode_len(header);
    if len > MAX_FRAME_LEN {
        return Err(FrameError::Oversize {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut body = vec![0_u8; len];
    reader.read_exact(&mut body).map_err(FrameError::io)?;
    serde_json::from_slice(&body).map_err(|source| FrameError::Decode {
        source: Arc::new(source),
    })
}

/// Encodes `value` as JSON and writes it as one frame.
///
/// # Errors
///
/// Returns [`FrameError::Encode`] when serialisation fails,
/// [`FrameError::Oversize`] when the body exceeds the limit, and
/// [`FrameError::Io`] when writing fails.
pub fn write_frame<T, W>(writer: &mut W, value: &T) -> Result<(), FrameError>
where
    T: Serialize + ?Sized,
    W: Write + ?Sized,
{
    let body = serde_json::to_vec(value).map_err(|source| FrameError::Encode {
        source: Arc::new(source),
    })?;
    if body.len() > MAX_FRAME_LEN {
        return Err(FrameError::Oversize {
            len: body.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let header = encode_len(body.len())?;
    writer.write_all(&header).map_err(FrameError::io)?;
    writer.write_all(&body).map_err(FrameError::io)?;
    writer.flush().map_err(FrameError::io)
}

/// Fills the header, distinguishing a clean close from a truncated header.
fn read_header<R>(reader: &mut R, header: &mut [u8; HEADER_LEN]) -> Result<(), FrameError>
where
    R: Read + ?Sized,
{
    let mut filled = 0;
    while let Some(remaining) = header.get_mut(filled..).filter(|rest| !rest.is_empty()) {
        match reader.read(remaining) {
            Ok(0) if filled == 0 => return Err(FrameError::Closed),
            Ok(0) => {
                return Err(FrameError::io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a frame header",
                )));
            }
            Ok(read) => filled += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(FrameError::io(error)),
        }
    }
    Ok(())
}

#[expect(
    clippy::big_endian_bytes,
    reason = "the wire format fixes network byte order"
)]
fn decode_len(header: [u8; HEADER_LEN]) -> usize {
    usize::try_from(u32::from_be_bytes(header)).unwrap_or(usize::MAX)
}

#[expect(
    clippy::big_endian_bytes,
    reason = "the wire format fixes network byte order"
)]
fn encode_len(len: usize) -> Result<[u8; HEADER_LEN], FrameError> {
    let len = u32::try_from(len).map_err(|_| FrameError::Oversize {
        len,
        max: MAX_FRAME_LEN,
    })?;
    Ok(len.to_be_bytes())
}
