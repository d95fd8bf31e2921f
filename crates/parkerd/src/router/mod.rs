//! Command routing from `<namespace>.<action>` to live plugins.
//!
//! Built-in actions are answered locally. Everything else is looked up in the
//! registry and forwarded as an HTTP POST. A connection failure earns exactly
//! one retry after a short pause; a second failure marks the registration
//! stale so the supervisor can recover the plugin. Until it registers again,
//! commands for the namespace fail as unavailable rather than unknown.

mod transport;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use parker_config::Config;
use parker_protocol::{Command, CommandIdError, Namespace, ReplyErrorKind};

use crate::core_actions::CoreActions;
use crate::registry::{PluginRegistration, PluginRegistry, Resolution};

pub use self::transport::{HttpReply, PluginTransport, ReqwestTransport, TransportError};

const ROUTER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::router");

/// A handler's answer, passed through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub status: u16,
    pub body: serde_json::Value,
}

impl Response {
    fn from_reply(reply: HttpReply) -> Self {
        let body = serde_json::from_slice(&reply.body).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&reply.body).into_owned())
        });
        Self {
            status: reply.status,
            body,
        }
    }
}

/// Reasons a command could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("invalid command: {0}")]
    InvalidCommand(#[from] CommandIdError),
    #[error("no plugin has ever registered namespace '{namespace}'")]
    UnknownPlugin { namespace: Namespace },
    #[error("plugin '{namespace}' does not serve action '{action}'")]
    UnknownAction { namespace: Namespace, action: String },
    /// The plugin is known but cannot be reached; callers should retry once
    /// it has been restarted.
    #[error("plugin '{namespace}' is unavailable: {message}")]
    PluginUnavailable {
        namespace: Namespace,
        /// Endpoint last registered for the namespace, if any.
        endpoint: Option<String>,
        /// Delivery attempts made; `0` when nothing was live to try.
        attempts: u32,
        message: String,
    },
    #[error("plugin '{namespace}' did not answer within {timeout_ms}ms")]
    Timeout { namespace: Namespace, timeout_ms: u64 },
    #[error("request to plugin '{namespace}' failed: {message}")]
    Transport { namespace: Namespace, message: String },
}

impl RouteError {
    /// Category reported on the command socket.
    pub fn kind(&self) -> ReplyErrorKind {
        match self {
            Self::InvalidCommand(_) => ReplyErrorKind::InvalidCommand,
            Self::UnknownPlugin { .. } => ReplyErrorKind::UnknownPlugin,
            Self::UnknownAction { .. } => ReplyErrorKind::UnknownAction,
            Self::PluginUnavailable { .. } => ReplyErrorKind::PluginUnavailable,
            Self::Timeout { .. } => ReplyErrorKind::Timeout,
            Self::Transport { .. } => ReplyErrorKind::Transport,
        }
    }
}

/// Forwarding parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterSettings {
    /// Deadline the transport applies to each attempt.
    pub forward_timeout: Duration,
    /// Pause before the single retry of a failed connection.
    pub retry_backoff: Duration,
}

impl RouterSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            forward_timeout: config.forward_timeout(),
            retry_backoff: config.forward_retry_backoff(),
        }
    }
}

/// Routes commands to built-in actions or registered plugins.
pub struct Router {
    registry: Arc<PluginRegistry>,
    transport: Arc<dyn PluginTransport>,
    core: CoreActions,
    settings: RouterSettings,
}

impl Router {
    pub fn new(
        registry: Arc<PluginRegistry>,
        transport: Arc<dyn PluginTransport>,
        core: CoreActions,
        settings: RouterSettings,
    ) -> Self {
        Self {
            registry,
            transport,
            core,
            settings,
        }
    }

    /// Builds a router that forwards over HTTP with the configured deadlines.
    pub fn from_config(
        registry: Arc<PluginRegistry>,
        config: &Config,
    ) -> Result<Self, reqwest::Error> {
        let settings = RouterSettings::from_config(config);
        let transport = ReqwestTransport::new(settings.forward_timeout)?;
        Ok(Self::new(
            registry,
            Arc::new(transport),
            CoreActions::new(),
            settings,
        ))
    }

    /// Parses `command` and routes it with `payload`.
    pub fn route_raw(
        &self,
        command: &str,
        payload: serde_json::Value,
    ) -> Result<Response, RouteError> {
        self.route(&Command::parse(command, payload)?)
    }

    /// Routes a command and returns the handler's response.
    pub fn route(&self, command: &Command) -> Result<Response, RouteError> {
        if let Some(body) = self.core.answer(command) {
            debug!(target: ROUTER_TARGET, command = %command.id(), "answered built-in action");
            return Ok(Response { status: 200, body });
        }

        let namespace = command.namespace();
        if !self.registry.permits(namespace, command.action()) {
            return Err(RouteError::UnknownAction {
                namespace: namespace.clone(),
                action: command.action().to_owned(),
            });
        }

        let registration = match self.registry.resolve(namespace) {
            Resolution::Live(registration) => registration,
            Resolution::Unavailable { last_endpoint } => {
                debug!(
                    target: ROUTER_TARGET,
                    command = %command.id(),
                    "namespace has no live registration"
                );
                return Err(RouteError::PluginUnavailable {
                    namespace: namespace.clone(),
                    endpoint: last_endpoint,
                    attempts: 0,
                    message: "no live registration; the plugin may be restarting".to_owned(),
                });
            }
            Resolution::Unknown => {
                return Err(RouteError::UnknownPlugin {
                    namespace: namespace.clone(),
                });
            }
        };
        if !registration.serves(command.action()) {
            return Err(RouteError::UnknownAction {
                namespace: command.namespace().clone(),
                action: command.action().to_owned(),
            });
        }

        let url = forward_url(&registration, command)?;
        debug!(
            target: ROUTER_TARGET,
            command = %command.id(),
            url = %url,
            generation = registration.generation(),
            "forwarding command"
        );
        self.forward(&registration, &url, command)
    }

    fn forward(
        &self,
        registration: &PluginRegistration,
        url: &Url,
        command: &Command,
    ) -> Result<Response, RouteError> {
        let first = match self.transport.post(url, command.payload()) {
            Err(TransportError::Connect(message)) => message,
            other => return self.finish(registration, other),
        };

        warn!(
            target: ROUTER_TARGET,
            command = %command.id(),
            error = %first,
            backoff_ms = self.settings.retry_backoff.as_millis(),
            "plugin connection failed; retrying once"
        );
        thread::sleep(self.settings.retry_backoff);

        match self.transport.post(url, command.payload()) {
            Err(TransportError::Connect(message)) => {
                self.registry.mark_stale(registration.connection_id());
                warn!(
                    target: ROUTER_TARGET,
                    command = %command.id(),
                    error = %message,
                    "plugin unreachable; registration marked stale"
                );
                Err(RouteError::PluginUnavailable {
                    namespace: registration.namespace().clone(),
                    endpoint: Some(registration.endpoint().to_owned()),
                    attempts: 2,
                    message: format!("{} refused 2 attempts: {message}", registration.endpoint()),
                })
            }
            other => self.finish(registration, other),
        }
    }

    fn finish(
        &self,
        registration: &PluginRegistration,
        outcome: Result<HttpReply, TransportError>,
    ) -> Result<Response, RouteError> {
        match outcome {
            Ok(reply) => Ok(Response::from_reply(reply)),
            Err(TransportError::Timeout) => Err(RouteError::Timeout {
                namespace: registration.namespace().clone(),
                timeout_ms: u64::try_from(self.settings.forward_timeout.as_millis())
                    .unwrap_or(u64::MAX),
            }),
            Err(TransportError::Connect(message) | TransportError::Other(message)) => {
                Err(RouteError::Transport {
                    namespace: registration.namespace().clone(),
                    message,
                })
            }
        }
    }
}

fn forward_url(registration: &PluginRegistration, command: &Command) -> Result<Url, RouteError> {
    let invalid = |error: url::ParseError| RouteError::Transport {
        namespace: registration.namespace().clone(),
        message: format!("invalid endpoint '{}': {error}", registration.endpoint()),
    };
    Url::parse(&format!("http://{}/", registration.endpoint()))
        .and_then(|base| base.join(&command.id().to_string()))
        .map_err(invalid)
}
