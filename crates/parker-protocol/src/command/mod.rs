//! Command socket messages.
//!
//! Callers write one JSON line naming a command and its payload and read
//! back exactly one JSON line describing the outcome.

use serde::{Deserialize, Serialize};

/// A routing request received on the command socket.
///
/// ```json
/// {"command":"weather.get","payload":{"locationName":"Loughborough"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    command: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl CommandRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(command: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            command: command.into(),
            payload,
        }
    }

    /// Returns the raw command identifier.
    #[must_use]
    pub const fn command(&self) -> &str {
        self.command.as_str()
    }

    /// Returns the payload.
    #[must_use]
    pub const fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Consumes the request, yielding its parts.
    #[must_use]
    pub fn into_parts(self) -> (String, serde_json::Value) {
        (self.command, self.payload)
    }
}

/// The single reply written for each [`CommandRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandReply {
    /// A plugin or built-in action answered.
    Response {
        /// HTTP status reported by the handler.
        status: u16,
        /// Response body, passed through unchanged.
        body: serde_json::Value,
    },
    /// The command could not be delivered.
    Error {
        /// Failure category.
        error: ReplyErrorKind,
        /// Human-readable detail.
        message: String,
    },
}

impl CommandReply {
    /// Builds an error reply.
    #[must_use]
    pub fn error(error: ReplyErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            error,
            message: message.into(),
        }
    }
}

/// Failure categories reported on the command socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyErrorKind {
    /// The request line was not a valid request.
    InvalidRequest,
    /// The command identifier was malformed.
    InvalidCommand,
    /// No live plugin serves the namespace.
    UnknownPlugin,
    /// The plugin does not declare the action.
    UnknownAction,
    /// The plugin could not be reached.
    PluginUnavailable,
    /// The plugin did not answer in time.
    Timeout,
    /// The HTTP exchange failed for another reason.
    Transport,
}
