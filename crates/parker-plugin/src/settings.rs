//! Client settings, usually read from the environment the master launches
//! plugins with.

use std::env;
use std::time::Duration;

use parker_protocol::Namespace;

use crate::error::ClientError;
use crate::socket::RegistrationSocket;

/// Registration socket address.
pub const SOCKET_ENV: &str = "PARKER_SOCKET";
/// Namespace the plugin serves.
pub const NAMESPACE_ENV: &str = "PARKER_NAMESPACE";
/// `host:port` of the plugin's HTTP surface.
pub const ENDPOINT_ENV: &str = "PARKER_ENDPOINT";

const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_CONNECT_BACKOFF: Duration = Duration::from_millis(200);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the registration client needs to announce a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Where the master accepts registrations.
    pub socket: RegistrationSocket,
    /// Namespace claimed by the plugin.
    pub namespace: Namespace,
    /// `host:port` the master forwards commands to.
    pub endpoint: String,
    /// Actions the plugin serves; empty means every action.
    pub actions: Vec<String>,
    /// Connection attempts per (re)connect before giving up.
    pub connect_attempts: u32,
    /// Pause between connection attempts.
    pub connect_backoff: Duration,
    /// Deadline for the master's acknowledgement.
    pub handshake_timeout: Duration,
    /// Whether a lost connection is re-established with a reclaim token.
    pub reconnect: bool,
}

impl ClientSettings {
    /// Builds settings with default connection behaviour.
    #[must_use]
    pub fn new(socket: RegistrationSocket, namespace: Namespace, endpoint: impl Into<String>) -> Self {
        Self {
            socket,
            namespace,
            endpoint: endpoint.into(),
            actions: Vec::new(),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_backoff: DEFAULT_CONNECT_BACKOFF,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            reconnect: true,
        }
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

    /// Reads `PARKER_SOCKET`, `PARKER_NAMESPACE`, and `PARKER_ENDPOINT`.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Resolves settings through `lookup`, which maps variable names to
    /// values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let required = |variable: &'static str| {
            lookup(variable)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| ClientError::Environment {
                    variable,
                    message: "not set".to_owned(),
                })
        };
        let socket = RegistrationSocket::parse(&required(SOCKET_ENV)?);
        let namespace = Namespace::new(required(NAMESPACE_ENV)?)?;
        let endpoint = required(ENDPOINT_ENV)?;
        Ok(Self::new(socket, namespace, endpoint))
    }
}
