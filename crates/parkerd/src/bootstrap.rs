//! Daemon bootstrap: configuration, telemetry, sockets, and manifests.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use parker_config::{Config, SocketPreparationError};

use crate::health::HealthReporter;
use crate::manifest::{self, ManifestError, PluginManifest};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that returns a configuration resolved earlier.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to load configuration: {source}")]
    Configuration {
        #[source]
        source: Arc<OrthoError>,
    },
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        #[source]
        source: TelemetryError,
    },
    #[error("failed to prepare {socket} socket: {source}")]
    Socket {
        socket: &'static str,
        #[source]
        source: SocketPreparationError,
    },
    #[error("failed to discover plugin manifests: {source}")]
    Manifests {
        #[source]
        source: ManifestError,
    },
}

/// Resolved daemon inputs, ready to be assembled into a running fabric.
pub struct Daemon {
    config: Config,
    manifests: Vec<PluginManifest>,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Daemon {
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Plugins discovered under the configured plugin directory.
    #[must_use]
    pub fn manifests(&self) -> &[PluginManifest] {
        &self.manifests
    }

    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    #[must_use]
    pub fn reporter(&self) -> Arc<dyn HealthReporter> {
        Arc::clone(&self.reporter)
    }

    /// Splits the daemon into its configuration and manifests.
    pub fn into_parts(self) -> (Config, Vec<PluginManifest>) {
        (self.config, self.manifests)
    }
}

/// Bootstraps the daemon using the supplied collaborators.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Daemon, BootstrapError> {
    reporter.bootstrap_starting();
    match prepare(loader) {
        Ok((config, manifests, telemetry)) => {
            reporter.bootstrap_succeeded(&config);
            Ok(Daemon {
                config,
                manifests,
                telemetry,
                reporter,
            })
        }
        Err(error) => {
            reporter.bootstrap_failed(&error);
            Err(error)
        }
    }
}

fn prepare(
    loader: &dyn ConfigLoader,
) -> Result<(Config, Vec<PluginManifest>, TelemetryHandle), BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;

    for (socket, endpoint) in [
        ("registration", config.registration_socket()),
        ("command", config.command_socket()),
    ] {
        endpoint
            .prepare_filesystem()
            .map_err(|source| BootstrapError::Socket { socket, source })?;
    }

    let manifests = manifest::discover(config.plugin_dir())
        .map_err(|source| BootstrapError::Manifests { source })?;
    Ok((config, manifests, telemetry))
}
