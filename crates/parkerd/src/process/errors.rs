//! Error surface for daemon launch.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTimeError;

use nix::errno::Errno;
use thiserror::Error;

use ortho_config::OrthoError;

use parker_config::{RuntimePathsError, SocketPreparationError};

use crate::bootstrap::BootstrapError;
use crate::fabric::FabricError;

use super::shutdown::ShutdownError;

/// Errors surfaced while launching or running the daemon process.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to load configuration: {source}")]
    Config {
        #[source]
        source: Arc<OrthoError>,
    },
    #[error("failed to prepare registration socket: {source}")]
    Socket {
        #[source]
        source: SocketPreparationError,
    },
    #[error(transparent)]
    RuntimePaths(#[from] RuntimePathsError),
    #[error("failed to create lock file '{path}': {source}")]
    LockCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Another daemon holds the lock and its pid is alive.
    #[error("daemon already running with pid {pid}")]
    AlreadyRunning { pid: u32 },
    #[error("failed to remove stale file '{path}': {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write pid file '{path}': {source}")]
    PidWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write health snapshot '{path}': {source}")]
    HealthWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialise health snapshot: {source}")]
    HealthSerialise {
        #[from]
        source: serde_json::Error,
    },
    #[error("failed to read system time: {source}")]
    Clock {
        #[source]
        source: SystemTimeError,
    },
    #[error("failed to check existing process {pid}: {source}")]
    CheckProcess { pid: u32, source: Errno },
    #[error("pid must be written before updating health state")]
    MissingPid,
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        #[source]
        source: ShutdownError,
    },
    #[error("daemon bootstrap failed: {source}")]
    Bootstrap {
        #[source]
        source: BootstrapError,
    },
    #[error("plugin fabric failed: {source}")]
    Fabric {
        #[source]
        source: FabricError,
    },
}

impl From<Arc<OrthoError>> for LaunchError {
    fn from(source: Arc<OrthoError>) -> Self {
        Self::Config { source }
    }
}

impl From<SocketPreparationError> for LaunchError {
    fn from(source: SocketPreparationError) -> Self {
        Self::Socket { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<FabricError> for LaunchError {
    fn from(source: FabricError) -> Self {
        Self::Fabric { source }
    }
}
