//! Errors raised by the plugin-side registration client.

use std::io;
use std::sync::Arc;

use parker_protocol::{FrameError, NamespaceError, RejectReason};
use thiserror::Error;

/// Errors that end a registration client.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// A required environment variable was absent or unusable.
    #[error("environment variable {variable} is invalid: {message}")]
    Environment {
        /// Variable name.
        variable: &'static str,
        /// Why the value was refused.
        message: String,
    },

    /// The namespace supplied to the client is not a valid namespace.
    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    /// Every connection attempt to the registration socket failed.
    #[error("could not connect to registration socket {socket} after {attempts} attempts: {source}")]
    Connect {
        /// Socket the client tried to reach.
        socket: String,
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        source: Arc<io::Error>,
    },

    /// Reading or writing a frame failed.
    #[error("registration exchange failed: {0}")]
    Frame(#[from] FrameError),

    /// The master refused the registration.
    #[error("registration rejected: {reason}")]
    Rejected {
        /// Reason reported by the master.
        reason: RejectReason,
    },

    /// The master's acknowledgement was incomplete.
    #[error("malformed acknowledgement: {message}")]
    MalformedAck {
        /// Missing or inconsistent field.
        message: String,
    },

    /// The connection dropped and reconnection is disabled.
    #[error("registration connection lost: {0}")]
    ConnectionLost(#[source] FrameError),

    /// The background client thread could not be spawned.
    #[error("failed to spawn registration thread: {0}")]
    Thread(#[source] Arc<io::Error>),

    /// The background client thread panicked.
    #[error("registration thread panicked")]
    Panicked,
}
