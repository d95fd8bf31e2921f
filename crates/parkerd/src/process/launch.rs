//! Launch sequencing for the master daemon.
//!
//! The daemon runs in the foreground: it takes the singleton lock, publishes
//! its pid and health, starts the plugin fabric, and waits for a shutdown
//! signal before tearing everything down in reverse.

use std::sync::Arc;

use tracing::info;

use parker_config::RuntimePaths;

use crate::bootstrap::{ConfigLoader, StaticConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::fabric::Fabric;
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::supervisor::{ProcessLauncher, SystemLauncher};

use super::errors::LaunchError;
use super::guard::{HealthState, ProcessGuard};
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};
use super::{PROCESS_TARGET, SHUTDOWN_TIMEOUT};

/// Collaborators required to run the daemon.
pub struct LaunchPlan<L, S> {
    pub loader: L,
    pub reporter: Arc<dyn HealthReporter>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub shutdown: S,
}

/// Runs the daemon using the production collaborators.
pub fn run_daemon() -> Result<(), LaunchError> {
    run_daemon_with(LaunchPlan {
        loader: SystemConfigLoader,
        reporter: Arc::new(StructuredHealthReporter::new()),
        launcher: Arc::new(SystemLauncher),
        shutdown: SystemShutdownSignal::new(SHUTDOWN_TIMEOUT),
    })
}

/// Runs the daemon with injected collaborators.
pub fn run_daemon_with<L, S>(plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal,
{
    let LaunchPlan {
        loader,
        reporter,
        launcher,
        shutdown,
    } = plan;

    let config = loader.load()?;
    config.registration_socket().prepare_filesystem()?;
    let mut guard = ProcessGuard::acquire(RuntimePaths::from_config(&config)?)?;
    guard.write_pid(std::process::id())?;
    guard.write_health(HealthState::Starting)?;

    let daemon = bootstrap_with(&StaticConfigLoader::new(config), reporter)?;
    info!(
        target: PROCESS_TARGET,
        plugins = daemon.manifests().len(),
        "starting daemon runtime"
    );
    let reporter = daemon.reporter();
    let (config, manifests) = daemon.into_parts();
    let fabric = Fabric::start(&config, manifests, reporter, launcher)?;

    guard.write_health(HealthState::Ready)?;
    let waited = shutdown.wait();
    guard.write_health(HealthState::Stopping)?;
    fabric.shutdown()?;
    waited?;
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}
