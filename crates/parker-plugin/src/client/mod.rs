//! Registration client state machine.
//!
//! A client walks `Connecting → Handshaking → Ready → HeartbeatLoop →
//! Closed`. Each state owns exactly the resources it needs: the connection
//! only exists from `Handshaking` onwards, and the generation granted by the
//! master is recorded on entering `Ready`. When the heartbeat connection
//! breaks and reconnection is enabled the client returns to `Connecting` and
//! presents its last generation as a reclaim token.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use parker_protocol::{
    AckFrame, AckStatus, FrameError, MasterFrame, PluginFrame, RegisterFrame, RejectReason,
    read_frame, write_frame,
};

use crate::error::ClientError;
use crate::settings::ClientSettings;
use crate::socket::Connection;

const CLIENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::client");

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const FALLBACK_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const MIN_HEARTBEAT_PERIOD: Duration = Duration::from_millis(10);

/// Observable stage of a registration client.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Opening the registration socket.
    #[default]
    Connecting,
    /// Register frame sent; awaiting the acknowledgement.
    Handshaking,
    /// Acknowledged; generation recorded.
    Ready,
    /// Sending heartbeats.
    HeartbeatLoop,
    /// Finished.
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
            Self::HeartbeatLoop => "heartbeat_loop",
            Self::Closed => "closed",
        })
    }
}

enum State {
    Connecting,
    Handshaking(Connection),
    Ready { connection: Connection, ack: AckFrame },
    HeartbeatLoop { connection: Connection, period: Duration },
    Closed(Result<(), ClientError>),
}

impl State {
    const fn phase(&self) -> Phase {
        match self {
            Self::Connecting => Phase::Connecting,
            Self::Handshaking(_) => Phase::Handshaking,
            Self::Ready { .. } => Phase::Ready,
            Self::HeartbeatLoop { .. } => Phase::HeartbeatLoop,
            Self::Closed(_) => Phase::Closed,
        }
    }
}

#[derive(Debug, Default)]
struct Status {
    phase: Phase,
    generation: Option<u64>,
    stopping: bool,
}

#[derive(Debug, Default)]
struct Shared {
    status: Mutex<Status>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, apply: impl FnOnce(&mut Status)) {
        apply(&mut self.lock());
        self.changed.notify_all();
    }

    fn stopping(&self) -> bool {
        self.lock().stopping
    }

    /// Sleeps for `timeout` unless a stop is requested first.
    fn wait_for_stop(&self, timeout: Duration) -> bool {
        let (status, _) = self
            .changed
            .wait_timeout_while(self.lock(), timeout, |status| !status.stopping)
            .unwrap_or_else(PoisonError::into_inner);
        status.stopping
    }
}

/// Starts a registration client on a background thread.
///
/// # Errors
///
/// Returns [`ClientError::Thread`] if the thread cannot be spawned. Failures
/// of the registration itself are reported by [`RegistrationHandle::join`]
/// or [`RegistrationHandle::stop`].
pub fn spawn(settings: ClientSettings) -> Result<RegistrationHandle, ClientError> {
    let shared = Arc::new(Shared::default());
    let name = format!("parker-register-{}", settings.namespace);
    let client = Client {
        settings,
        shared: Arc::clone(&shared),
        reclaim: None,
    };
    let thread = thread::Builder::new()
        .name(name)
        .spawn(move || client.run())
        .map_err(|source| ClientError::Thread(Arc::new(source)))?;
    Ok(RegistrationHandle {
        shared,
        thread: Some(thread),
    })
}

/// Handle to a running registration client.
///
/// Dropping the handle stops the client and waits for it.
#[derive(Debug)]
pub struct RegistrationHandle {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<Result<(), ClientError>>>,
}

impl RegistrationHandle {
    /// Current stage of the client.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.shared.lock().phase
    }

    /// Generation granted by the master for the live registration.
    #[must_use]
    pub fn generation(&self) -> Option<u64> {
        self.shared.lock().generation
    }

    /// Blocks until the client reaches `phase`, closes, or `timeout` elapses.
    /// Returns whether `phase` was reached.
    #[must_use]
    pub fn wait_for_phase(&self, phase: Phase, timeout: Duration) -> bool {
        let (status, _) = self
            .shared
            .changed
            .wait_timeout_while(self.shared.lock(), timeout, |status| {
                status.phase != phase && status.phase != Phase::Closed
            })
            .unwrap_or_else(PoisonError::into_inner);
        status.phase == phase
    }

    /// Stops heartbeating, closes the connection, and waits for the client.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the client if it closed before the stop.
    pub fn stop(mut self) -> Result<(), ClientError> {
        self.shared.update(|status| status.stopping = true);
        self.finish()
    }

    /// Waits for the client to close on its own.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the client.
    pub fn join(mut self) -> Result<(), ClientError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<(), ClientError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| ClientError::Panicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for RegistrationHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shared.update(|status| status.stopping = true);
            if let Err(error) = self.finish() {
                debug!(target: CLIENT_TARGET, %error, "registration client ended with error");
            }
        }
    }
}

struct Client {
    settings: ClientSettings,
    shared: Arc<Shared>,
    reclaim: Option<u64>,
}

impl Client {
    fn run(mut self) -> Result<(), ClientError> {
        let mut state = State::Connecting;
        loop {
            let phase = state.phase();
            self.shared.update(|status| status.phase = phase);
            debug!(target: CLIENT_TARGET, namespace = %self.settings.namespace, %phase, "entering phase");
            state = match state {
                State::Closed(outcome) => {
                    self.shared.update(|status| status.generation = None);
                    if let Err(error) = &outcome {
                        warn!(target: CLIENT_TARGET, namespace = %self.settings.namespace, %error, "registration client closed");
                    }
                    return outcome;
                }
                _ if self.shared.stopping() => State::Closed(Ok(())),
                State::Connecting => self.connect(),
                State::Handshaking(connection) => self.handshake(connection),
                State::Ready { connection, ack } => self.ready(connection, &ack),
                State::HeartbeatLoop { connection, period } => self.heartbeat(connection, period),
            };
        }
    }

    fn connect(&self) -> State {
        let attempts = self.settings.connect_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.settings.socket.connect(CONNECT_TIMEOUT) {
                Ok(connection) => return State::Handshaking(connection),
                Err(source) if attempt >= attempts => {
                    return State::Closed(Err(ClientError::Connect {
                        socket: self.settings.socket.to_string(),
                        attempts,
                        source: Arc::new(source),
                    }));
                }
                Err(error) => {
                    debug!(
                        target: CLIENT_TARGET,
                        socket = %self.settings.socket,
                        attempt,
                        %error,
                        "registration socket unavailable"
                    );
                    if self.shared.wait_for_stop(self.settings.connect_backoff) {
                        return State::Closed(Ok(()));
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn handshake(&self, mut connection: Connection) -> State {
        match self.exchange(&mut connection) {
            Ok(ack) if ack.status() == AckStatus::Ok => State::Ready { connection, ack },
            Ok(ack) => {
                connection.close();
                State::Closed(Err(ClientError::Rejected {
                    reason: ack.reason().unwrap_or(RejectReason::BadHandshake),
                }))
            }
            Err(error) => {
                connection.close();
                State::Closed(Err(error))
            }
        }
    }

    fn exchange(&self, connection: &mut Connection) -> Result<AckFrame, ClientError> {
        let deadline = Some(self.settings.handshake_timeout).filter(|value| !value.is_zero());
        connection
            .set_read_timeout(deadline)
            .and_then(|()| connection.set_write_timeout(deadline))
            .map_err(|source| FrameError::Io {
                source: Arc::new(source),
            })?;

        let mut frame = RegisterFrame::new(
            self.settings.namespace.clone(),
            self.settings.endpoint.clone(),
        )
        .with_actions(self.settings.actions.iter().cloned());
        if let Some(generation) = self.reclaim {
            frame = frame.with_generation(generation);
        }
        write_frame(connection, &PluginFrame::Register(frame))?;
        let MasterFrame::Ack(ack) = read_frame::<MasterFrame, _>(connection)?;
        Ok(ack)
    }

    fn ready(&mut self, connection: Connection, ack: &AckFrame) -> State {
        let Some(generation) = ack.generation() else {
            connection.close();
            return State::Closed(Err(ClientError::MalformedAck {
                message: "accepted acknowledgement carries no generation".to_owned(),
            }));
        };
        let interval = ack
            .heartbeat_interval()
            .filter(|value| !value.is_zero())
            .unwrap_or(FALLBACK_HEARTBEAT_INTERVAL);
        self.reclaim = Some(generation);
        self.shared.update(|status| status.generation = Some(generation));
        info!(
            target: CLIENT_TARGET,
            namespace = %self.settings.namespace,
            generation,
            heartbeat_interval_ms = interval.as_millis(),
            "registered with master"
        );
        State::HeartbeatLoop {
            connection,
            period: (interval / 3).max(MIN_HEARTBEAT_PERIOD),
        }
    }

    fn heartbeat(&self, mut connection: Connection, period: Duration) -> State {
        loop {
            if self.shared.wait_for_stop(period) {
                connection.close();
                return State::Closed(Ok(()));
            }
            if let Err(error) = write_frame(&mut connection, &PluginFrame::Heartbeat) {
                connection.close();
                self.shared.update(|status| status.generation = None);
                if !self.settings.reconnect {
                    return State::Closed(Err(ClientError::ConnectionLost(error)));
                }
                warn!(
                    target: CLIENT_TARGET,
                    namespace = %self.settings.namespace,
                    reclaim = ?self.reclaim,
                    %error,
                    "registration connection lost; reconnecting"
                );
                return State::Connecting;
            }
        }
    }
}
