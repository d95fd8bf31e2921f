//! Error types for command socket requests.

use std::io;

use thiserror::Error;

/// Errors raised before a request reaches the router.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Request line could not be parsed as a command request.
    #[error("malformed request: {message}")]
    MalformedRequest {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// The client did not finish its request line before the read deadline.
    #[error("no complete request received before the read deadline")]
    RequestTimeout,

    /// Request exceeds the maximum allowed size.
    #[error("request too large: {size} bytes exceeds {max_size} byte limit")]
    RequestTooLarge { size: usize, max_size: usize },

    /// IO error during read or write.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Reply serialisation failed.
    #[error("failed to serialise reply: {0}")]
    SerializeReply(#[source] serde_json::Error),
}

impl DispatchError {
    pub fn request_too_large(size: usize, max_size: usize) -> Self {
        Self::RequestTooLarge { size, max_size }
    }

    /// Classifies a read failure, separating deadline expiry from other I/O
    /// errors.
    pub fn from_read(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::RequestTimeout,
            _ => Self::Io(error),
        }
    }

    pub fn malformed(source: serde_json::Error) -> Self {
        Self::MalformedRequest {
            message: source.to_string(),
            source: Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_timeouts_are_classified() {
        let timed_out = io::Error::from(io::ErrorKind::WouldBlock);
        assert!(matches!(
            DispatchError::from_read(timed_out),
            DispatchError::RequestTimeout
        ));
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(matches!(DispatchError::from_read(reset), DispatchError::Io(_)));
    }

    #[test]
    fn too_large_message_names_both_sizes() {
        let error = DispatchError::request_too_large(2_000_000, 1_048_576);
        assert_eq!(
            error.to_string(),
            "request too large: 2000000 bytes exceeds 1048576 byte limit"
        );
    }
}
