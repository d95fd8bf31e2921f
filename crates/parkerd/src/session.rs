//! Registration sessions: one per plugin connection.
//!
//! A session reads the `register` handshake under a deadline, claims the
//! namespace, acknowledges, and then consumes heartbeats until the peer goes
//! quiet, disconnects, or loses its registration. Every failure here is local
//! to the connection.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use parker_config::Config;
use parker_protocol::{
    AckFrame, FrameError, MasterFrame, Namespace, PluginFrame, RegisterFrame, RejectReason,
    read_frame, write_frame,
};

use crate::health::HealthReporter;
use crate::registry::{ClaimError, ConnectionId, PluginRegistry, RegistrationRequest};
use crate::transport::{ConnectionHandler, ConnectionStream};

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Deadlines applied to registration sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Heartbeat interval plus grace.
    pub liveness_deadline: Duration,
}

impl SessionTiming {
    pub fn from_config(config: &Config) -> Self {
        Self {
            handshake_timeout: config.handshake_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            liveness_deadline: config.liveness_deadline(),
        }
    }
}

/// Reasons a handshake is refused.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("failed to read handshake frame: {source}")]
    Read {
        #[source]
        source: FrameError,
    },
    #[error("first frame was a heartbeat, expected register")]
    UnexpectedFrame,
    #[error("registration for '{namespace}' has an empty endpoint")]
    EmptyEndpoint { namespace: Namespace },
    #[error(transparent)]
    Claim(#[from] ClaimError),
}

impl HandshakeError {
    /// Wire reason sent back to the plugin.
    pub fn reason(&self) -> RejectReason {
        match self {
            Self::Read { .. } | Self::UnexpectedFrame | Self::EmptyEndpoint { .. } => {
                RejectReason::BadHandshake
            }
            Self::Claim(_) => RejectReason::NamespaceConflict,
        }
    }
}

/// Why an accepted session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The plugin closed the connection.
    Closed,
    /// No heartbeat arrived within the liveness deadline.
    DeadlineExpired,
    /// The registration was superseded or marked stale elsewhere.
    Superseded,
    /// The plugin sent a frame that is only valid during the handshake.
    ProtocolViolation,
    /// The connection failed.
    Failed(FrameError),
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => formatter.write_str("connection closed"),
            Self::DeadlineExpired => formatter.write_str("heartbeat deadline expired"),
            Self::Superseded => formatter.write_str("registration no longer current"),
            Self::ProtocolViolation => formatter.write_str("unexpected register frame"),
            Self::Failed(error) => write!(formatter, "connection failed: {error}"),
        }
    }
}

struct Accepted {
    namespace: Namespace,
    generation: u64,
    endpoint: String,
}

/// Connection handler serving the registration socket.
pub struct RegistrationHandler {
    registry: Arc<PluginRegistry>,
    reporter: Arc<dyn HealthReporter>,
    timing: SessionTiming,
}

impl RegistrationHandler {
    pub fn new(
        registry: Arc<PluginRegistry>,
        reporter: Arc<dyn HealthReporter>,
        timing: SessionTiming,
    ) -> Self {
        Self {
            registry,
            reporter,
            timing,
        }
    }

    fn run(&self, mut stream: ConnectionStream) {
        let connection_id = self.registry.next_connection_id();
        if let Err(error) = apply_deadline(&stream, self.timing.handshake_timeout) {
            warn!(target: SESSION_TARGET, connection = %connection_id, %error, "failed to set handshake deadline");
            return;
        }

        let accepted = match self.handshake(&mut stream, connection_id) {
            Ok(accepted) => accepted,
            Err(error) => {
                self.reporter.registration_rejected(&error);
                let ack = MasterFrame::Ack(AckFrame::rejected(error.reason()));
                if let Err(write_error) = write_frame(&mut stream, &ack) {
                    debug!(target: SESSION_TARGET, connection = %connection_id, error = %write_error, "failed to send rejection");
                }
                close(&stream);
                return;
            }
        };

        let Accepted {
            namespace,
            generation,
            endpoint,
        } = accepted;
        let ack = MasterFrame::Ack(AckFrame::accepted(generation, self.timing.heartbeat_interval));
        let end = match write_frame(&mut stream, &ack) {
            Ok(()) => {
                self.reporter
                    .registration_accepted(&namespace, generation, &endpoint);
                self.liveness(&mut stream, connection_id)
            }
            Err(error) => SessionEnd::Failed(error),
        };

        self.registry.mark_stale(connection_id);
        self.reporter.registration_closed(&namespace, generation, &end);
        close(&stream);
    }

    fn handshake(
        &self,
        stream: &mut ConnectionStream,
        connection_id: ConnectionId,
    ) -> Result<Accepted, HandshakeError> {
        let frame = match read_frame::<PluginFrame, _>(stream) {
            Ok(PluginFrame::Register(frame)) => frame,
            Ok(PluginFrame::Heartbeat) => return Err(HandshakeError::UnexpectedFrame),
            Err(source) => return Err(HandshakeError::Read { source }),
        };
        let request = registration_request(frame, connection_id)?;
        let namespace = request.namespace.clone();
        let endpoint = request.endpoint.clone();
        debug!(
            target: SESSION_TARGET,
            connection = %connection_id,
            namespace = %namespace,
            reclaim = ?request.reclaim,
            "claiming namespace"
        );
        let generation = self.registry.claim(request)?;
        Ok(Accepted {
            namespace,
            generation,
            endpoint,
        })
    }

    fn liveness(&self, stream: &mut ConnectionStream, connection_id: ConnectionId) -> SessionEnd {
        if let Err(error) = apply_deadline(stream, self.timing.liveness_deadline) {
            return SessionEnd::Failed(FrameError::Io {
                source: Arc::new(error),
            });
        }
        loop {
            match read_frame::<PluginFrame, _>(stream) {
                Ok(PluginFrame::Heartbeat) => {
                    if !self.registry.is_current(connection_id) {
                        return SessionEnd::Superseded;
                    }
                    debug!(target: SESSION_TARGET, connection = %connection_id, "heartbeat");
                }
                Ok(PluginFrame::Register(_)) => return SessionEnd::ProtocolViolation,
                Err(FrameError::Closed) => return SessionEnd::Closed,
                Err(error) if error.is_timeout() => return SessionEnd::DeadlineExpired,
                Err(error) => return SessionEnd::Failed(error),
            }
        }
    }
}

impl ConnectionHandler for RegistrationHandler {
    fn handle(&self, stream: ConnectionStream) {
        self.run(stream);
    }
}

fn registration_request(
    frame: RegisterFrame,
    connection_id: ConnectionId,
) -> Result<RegistrationRequest, HandshakeError> {
    if frame.endpoint().trim().is_empty() {
        return Err(HandshakeError::EmptyEndpoint {
            namespace: frame.namespace().clone(),
        });
    }
    Ok(RegistrationRequest {
        namespace: frame.namespace().clone(),
        endpoint: frame.endpoint().trim().to_owned(),
        connection_id,
        reclaim: frame.generation(),
        actions: frame.actions().to_vec(),
    })
}

fn apply_deadline(stream: &ConnectionStream, deadline: Duration) -> std::io::Result<()> {
    let deadline = Some(deadline).filter(|value| !value.is_zero());
    stream.set_read_timeout(deadline)?;
    stream.set_write_timeout(deadline)
}

fn close(stream: &ConnectionStream) {
    if let Err(error) = stream.close() {
        debug!(target: SESSION_TARGET, %error, "failed to close registration connection");
    }
}
