//! Daemon process control: singleton lock, pid and health files, signals,
//! and the launch sequence.

mod errors;
mod files;
mod guard;
mod launch;
mod shutdown;

use std::time::Duration;

pub use errors::LaunchError;
pub use launch::{LaunchPlan, run_daemon, run_daemon_with};
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
pub(crate) const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
