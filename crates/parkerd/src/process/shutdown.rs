use std::io;
use std::time::Duration;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

/// Blocks until the daemon should stop.
pub trait ShutdownSignal: Send + Sync {
    fn wait(&self) -> Result<(), ShutdownError>;
}

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("failed to install signal handlers: {source}")]
    Install {
        #[source]
        source: io::Error,
    },
}

/// Waits for SIGTERM, SIGINT, SIGQUIT, or SIGHUP.
#[derive(Debug, Clone)]
pub struct SystemShutdownSignal {
    grace: Duration,
}

impl SystemShutdownSignal {
    /// `grace` is reported alongside the received signal.
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        if let Some(signal) = signals.forever().next() {
            info!(
                target: PROCESS_TARGET,
                signal,
                grace_ms = self.grace.as_millis(),
                "shutdown signal received"
            );
        }
        Ok(())
    }
}
