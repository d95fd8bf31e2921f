//! Supervision of plugin processes.
//!
//! Each manifest gets a dedicated worker thread that launches the plugin,
//! waits for it to register, watches registry events for loss of liveness,
//! and restarts the process under exponential backoff when it exits. The
//! registry is only ever touched through `mark_stale`; process state stays
//! with the supervisor.

mod launcher;
mod worker;

use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use parker_config::{Config, SocketEndpoint};
use parker_protocol::Namespace;

use crate::health::HealthReporter;
use crate::manifest::PluginManifest;
use crate::registry::PluginRegistry;

pub use self::launcher::{
    ChildProcess, ENDPOINT_ENV, LaunchSpec, NAMESPACE_ENV, ProcessLauncher, SOCKET_ENV,
    SystemLauncher,
};

const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");

/// Lifecycle state of a supervised plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Starting,
    Ready,
    Degraded,
    Stopped,
}

/// Observable state of one supervised plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessSnapshot {
    pub namespace: Namespace,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub last_exit_reason: Option<String>,
    /// Actions listed in the plugin's manifest.
    pub actions: Vec<String>,
}

impl ProcessSnapshot {
    fn new(manifest: &PluginManifest) -> Self {
        Self {
            namespace: manifest.namespace().clone(),
            state: ProcessState::Starting,
            pid: None,
            restart_count: 0,
            last_exit_reason: None,
            actions: manifest.action_names(),
        }
    }
}

/// Errors surfaced while supervising plugins.
#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    #[error("failed to spawn plugin '{namespace}': {source}")]
    Spawn {
        namespace: Namespace,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("failed to start supervision thread for '{namespace}': {source}")]
    Thread {
        namespace: Namespace,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("plugin '{namespace}' exhausted its restart budget after {restarts} restarts")]
    RestartExhausted { namespace: Namespace, restarts: u32 },
}

impl SupervisorError {
    pub fn namespace(&self) -> &Namespace {
        match self {
            Self::Spawn { namespace, .. }
            | Self::Thread { namespace, .. }
            | Self::RestartExhausted { namespace, .. } => namespace,
        }
    }
}

/// Timing and restart policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Time a launched or degraded plugin has to register.
    pub readiness_window: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Restarts allowed before a plugin is left stopped.
    pub max_restarts: Option<u32>,
    /// Value handed to plugins in `PARKER_SOCKET`.
    pub registration_socket: String,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            readiness_window: config.readiness_window(),
            backoff_initial: config.restart_backoff_initial(),
            backoff_max: config.restart_backoff_max(),
            max_restarts: config.max_restarts(),
            registration_socket: plugin_socket_value(config.registration_socket()),
        }
    }

    /// Delay before restart number `restarts + 1`.
    pub fn backoff(&self, restarts: u32) -> Duration {
        let factor = 2_u32.saturating_pow(restarts);
        self.backoff_initial
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

/// Renders an endpoint as plugins expect it: a socket path or `host:port`.
pub fn plugin_socket_value(endpoint: &SocketEndpoint) -> String {
    match endpoint {
        SocketEndpoint::Unix { path } => path.to_string(),
        SocketEndpoint::Tcp { host, port } => format!("{host}:{port}"),
    }
}

/// Collaborators shared by every worker.
#[derive(Clone)]
pub struct SupervisorContext {
    pub registry: Arc<PluginRegistry>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub reporter: Arc<dyn HealthReporter>,
    pub settings: SupervisorSettings,
}

/// Interruptible stop flag shared with workers.
#[derive(Debug, Default)]
pub(crate) struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl StopSignal {
    pub(crate) fn trigger(&self) {
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        *stopped = true;
        self.condvar.notify_all();
    }

    pub(crate) fn is_set(&self) -> bool {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for `timeout` unless stopped first. Returns `true` when stopped.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let (stopped, _) = self
            .condvar
            .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *stopped
    }
}

/// Shared read-only view of supervised process state.
#[derive(Debug, Clone, Default)]
pub struct SupervisorStatus {
    entries: Vec<Arc<Mutex<ProcessSnapshot>>>,
}

impl SupervisorStatus {
    /// Current state of every supervised plugin, in manifest order.
    pub fn snapshot(&self) -> Vec<ProcessSnapshot> {
        self.entries
            .iter()
            .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect()
    }
}

/// Owns one supervision thread per plugin.
pub struct Supervisor {
    status: SupervisorStatus,
    threads: Vec<JoinHandle<()>>,
    stop: Arc<StopSignal>,
}

impl Supervisor {
    /// Starts supervising every manifest.
    ///
    /// Fails only if a worker thread cannot be created; workers already
    /// started are stopped before returning.
    pub fn start(
        manifests: Vec<PluginManifest>,
        context: SupervisorContext,
    ) -> Result<Self, SupervisorError> {
        let mut supervisor = Self {
            status: SupervisorStatus::default(),
            threads: Vec::with_capacity(manifests.len()),
            stop: Arc::new(StopSignal::default()),
        };
        for manifest in manifests {
            let namespace = manifest.namespace().clone();
            let entry = Arc::new(Mutex::new(ProcessSnapshot::new(&manifest)));
            let worker = worker::Worker::new(
                manifest,
                context.clone(),
                Arc::clone(&entry),
                Arc::clone(&supervisor.stop),
            );
            let spawned = thread::Builder::new()
                .name(format!("parker-supervise-{namespace}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(thread) => {
                    supervisor.status.entries.push(entry);
                    supervisor.threads.push(thread);
                }
                Err(source) => {
                    supervisor.shutdown();
                    return Err(SupervisorError::Thread {
                        namespace,
                        source: Arc::new(source),
                    });
                }
            }
        }
        Ok(supervisor)
    }

    /// Handle for observing process state from other threads.
    pub fn status(&self) -> SupervisorStatus {
        self.status.clone()
    }

    pub fn snapshot(&self) -> Vec<ProcessSnapshot> {
        self.status.snapshot()
    }

    /// Stops every worker and kills its child process.
    pub fn shutdown(&mut self) {
        self.stop.trigger();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                warn!(target: SUPERVISOR_TARGET, "supervision thread panicked");
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
