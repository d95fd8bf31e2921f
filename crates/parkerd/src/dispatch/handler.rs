//! Connection handler for the command socket.
//!
//! Each connection carries a single request line such as
//! `{"command":"weather.get","payload":{...}}`. The handler routes it and
//! writes exactly one reply line before closing the connection.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use parker_protocol::{CommandReply, CommandRequest, ReplyErrorKind};

use crate::registry::{PluginRegistry, RouteEntry};
use crate::router::Router;
use crate::supervisor::{ProcessSnapshot, SupervisorStatus};
use crate::transport::{ConnectionHandler, ConnectionStream};

use super::DISPATCH_TARGET;
use super::errors::DispatchError;

/// Maximum size of a single request line in bytes.
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Command answered with the registry and supervisor snapshot.
pub const STATUS_COMMAND: &str = "parker.status";

/// Time a client has to deliver its request line, and the reply write
/// deadline.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct StatusReport {
    plugins: Vec<RouteEntry>,
    processes: Vec<ProcessSnapshot>,
}

/// Routes command socket requests.
pub struct CommandConnectionHandler {
    router: Arc<Router>,
    registry: Arc<PluginRegistry>,
    processes: SupervisorStatus,
    request_timeout: Duration,
}

impl CommandConnectionHandler {
    pub fn new(
        router: Arc<Router>,
        registry: Arc<PluginRegistry>,
        processes: SupervisorStatus,
    ) -> Self {
        Self {
            router,
            registry,
            processes,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn dispatch(&self, mut stream: ConnectionStream) {
        let deadline = Some(self.request_timeout).filter(|timeout| !timeout.is_zero());
        if let Err(error) = stream
            .set_read_timeout(deadline)
            .and_then(|()| stream.set_write_timeout(deadline))
        {
            warn!(target: DISPATCH_TARGET, %error, "failed to set command connection deadline");
            return;
        }

        let reply = match read_request_line(&mut stream) {
            Ok(Some(bytes)) => self.answer(&bytes),
            Ok(None) => {
                debug!(target: DISPATCH_TARGET, "client disconnected without request");
                return;
            }
            Err(error) => {
                warn!(target: DISPATCH_TARGET, %error, "failed to read request");
                CommandReply::error(ReplyErrorKind::InvalidRequest, error.to_string())
            }
        };

        if let Err(error) = write_reply(&mut stream, &reply) {
            warn!(target: DISPATCH_TARGET, %error, "failed to write reply");
        }
        if let Err(error) = stream.close() {
            debug!(target: DISPATCH_TARGET, %error, "failed to close command connection");
        }
    }

    fn answer(&self, bytes: &[u8]) -> CommandReply {
        let request: CommandRequest = match serde_json::from_slice(bytes) {
            Ok(request) => request,
            Err(source) => {
                let error = DispatchError::malformed(source);
                warn!(target: DISPATCH_TARGET, %error, "malformed request");
                return CommandReply::error(ReplyErrorKind::InvalidRequest, error.to_string());
            }
        };

        if request.command() == STATUS_COMMAND {
            return self.status();
        }

        debug!(target: DISPATCH_TARGET, command = request.command(), "dispatching request");
        let (command, payload) = request.into_parts();
        match self.router.route_raw(&command, payload) {
            Ok(response) => CommandReply::Response {
                status: response.status,
                body: response.body,
            },
            Err(error) => {
                warn!(target: DISPATCH_TARGET, %command, %error, "command failed");
                CommandReply::error(error.kind(), error.to_string())
            }
        }
    }

    fn status(&self) -> CommandReply {
        let report = StatusReport {
            plugins: self.registry.snapshot(),
            processes: self.processes.snapshot(),
        };
        match serde_json::to_value(report) {
            Ok(body) => CommandReply::Response { status: 200, body },
            Err(error) => CommandReply::error(ReplyErrorKind::Transport, error.to_string()),
        }
    }
}

impl ConnectionHandler for CommandConnectionHandler {
    fn handle(&self, stream: ConnectionStream) {
        self.dispatch(stream);
    }
}

fn write_reply(stream: &mut impl Write, reply: &CommandReply) -> Result<(), DispatchError> {
    serde_json::to_writer(&mut *stream, reply).map_err(DispatchError::SerializeReply)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

/// Reads a bounded JSONL request line from the stream.
///
/// Returns `Ok(None)` if the client disconnects without sending data.
fn read_request_line(stream: &mut impl Read) -> Result<Option<Vec<u8>>, DispatchError> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];

    loop {
        let bytes_read = read_with_retry(stream, &mut chunk).map_err(DispatchError::from_read)?;

        if bytes_read == 0 {
            return Ok(if buffer.is_empty() {
                None
            } else {
                Some(buffer)
            });
        }

        if let Some(newline_pos) = chunk[..bytes_read].iter().position(|b| *b == b'\n') {
            buffer.extend_from_slice(&chunk[..newline_pos]);
            enforce_limit(buffer.len())?;
            return Ok(Some(buffer));
        }

        buffer.extend_from_slice(&chunk[..bytes_read]);
        enforce_limit(buffer.len())?;
    }
}

fn read_with_retry(stream: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match stream.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn enforce_limit(size: usize) -> Result<(), DispatchError> {
    if size > MAX_REQUEST_BYTES {
        return Err(DispatchError::request_too_large(size, MAX_REQUEST_BYTES));
    }
    Ok(())
}
