//! Registration socket frames.
//!
//! Every frame is a JSON object tagged by `"type"`. Plugins send
//! [`PluginFrame`]s; the master answers with [`MasterFrame`]s.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::namespace::Namespace;

/// Frames sent by a plugin to the master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PluginFrame {
    /// Identity announcement; must be the first frame on a connection.
    Register(RegisterFrame),
    /// Liveness signal.
    Heartbeat,
}

/// Payload of a `register` frame.
///
/// # Example
///
/// ```
/// use parker_protocol::{Namespace, PluginFrame, RegisterFrame};
///
/// let frame = PluginFrame::Register(RegisterFrame::new(
///     Namespace::new("music").expect("valid namespace"),
///     "127.0.0.1:8081",
/// ));
/// let json = serde_json::to_string(&frame).expect("serialise");
/// assert_eq!(
///     json,
///     r#"{"type":"register","namespace":"music","endpoint":"127.0.0.1:8081"}"#
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFrame {
    namespace: Namespace,
    endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    generation: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    actions: Vec<String>,
}

impl RegisterFrame {
    /// Creates a registration for `namespace` served at `endpoint`.
    #[must_use]
    pub fn new(namespace: Namespace, endpoint: impl Into<String>) -> Self {
        Self {
            namespace,
            endpoint: endpoint.into(),
            generation: None,
            actions: Vec::new(),
        }
    }

    /// Attaches a reclaim token: the generation previously granted to this
    /// plugin.
    #[must_use]
    pub const fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Declares the actions the plugin serves.
    #[must_use]
    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the namespace being claimed.
    #[must_use]
    pub const fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Returns the `host:port` the plugin's HTTP surface listens on.
    #[must_use]
    pub const fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    /// Returns the reclaim token, if any.
    #[must_use]
    pub const fn generation(&self) -> Option<u64> {
        self.generation
    }

    /// Returns the declared action names.
    #[must_use]
    pub fn actions(&self) -> &[String] {
        &self.actions
    }
}

/// Frames sent by the master to a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MasterFrame {
    /// Handshake outcome.
    Ack(AckFrame),
}

/// Handshake outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckFrame {
    status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<RejectReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    generation: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    heartbeat_interval_ms: Option<u64>,
}

impl AckFrame {
    /// Builds an accepting acknowledgement.
    #[must_use]
    pub fn accepted(generation: u64, heartbeat_interval: Duration) -> Self {
        Self {
            status: AckStatus::Ok,
            reason: None,
            generation: Some(generation),
            heartbeat_interval_ms: Some(
                u64::try_from(heartbeat_interval.as_millis()).unwrap_or(u64::MAX),
            ),
        }
    }

    /// Builds a rejecting acknowledgement.
    #[must_use]
    pub const fn rejected(reason: RejectReason) -> Self {
        Self {
            status: AckStatus::Rejected,
            reason: Some(reason),
            generation: None,
            heartbeat_interval_ms: None,
        }
    }

    /// Returns the acknowledgement status.
    #[must_use]
    pub const fn status(&self) -> AckStatus {
        self.status
    }

    /// Returns the rejection reason when the status is `rejected`.
    #[must_use]
    pub const fn reason(&self) -> Option<RejectReason> {
        self.reason
    }

    /// Returns the generation granted by an accepting acknowledgement.
    #[must_use]
    pub const fn generation(&self) -> Option<u64> {
        self.generation
    }

    /// Returns the heartbeat interval advertised by the master.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Option<Duration> {
        match self.heartbeat_interval_ms {
            Some(millis) => Some(Duration::from_millis(millis)),
            None => None,
        }
    }
}

/// Status carried by an [`AckFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    /// The registration was accepted.
    Ok,
    /// The registration was refused.
    Rejected,
}

/// Why a handshake was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The first frame was missing, undecodable, or not a valid `register`.
    BadHandshake,
    /// Another live plugin owns the namespace, or it is reserved.
    NamespaceConflict,
}

impl RejectReason {
    /// Wire form of the reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadHandshake => "bad_handshake",
            Self::NamespaceConflict => "namespace_conflict",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}
