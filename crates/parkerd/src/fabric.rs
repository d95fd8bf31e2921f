//! Assembly of the running plugin fabric.
//!
//! The registration listener is bound first so the resolved endpoint (TCP
//! port `0` becomes a real port) can be handed to supervised plugins.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use parker_config::{Config, SocketEndpoint};
use parker_protocol::Namespace;

use crate::core_actions::CoreActions;
use crate::dispatch::CommandConnectionHandler;
use crate::health::HealthReporter;
use crate::manifest::PluginManifest;
use crate::registry::PluginRegistry;
use crate::router::Router;
use crate::session::{RegistrationHandler, SessionTiming};
use crate::supervisor::{
    ProcessLauncher, ProcessSnapshot, Supervisor, SupervisorContext, SupervisorError,
    SupervisorSettings, plugin_socket_value,
};
use crate::transport::{ListenerError, ListenerHandle, SocketListener};

const FABRIC_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::fabric");

/// Namespace of daemon-level commands such as `parker.status`.
pub const DAEMON_NAMESPACE: &str = "parker";

/// Errors raised while starting or stopping the fabric.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("{socket} socket listener failed: {source}")]
    Listener {
        socket: &'static str,
        #[source]
        source: ListenerError,
    },
    #[error("failed to build plugin HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// Registry, listeners, router, and supervisor running together.
pub struct Fabric {
    registry: Arc<PluginRegistry>,
    router: Arc<Router>,
    supervisor: Supervisor,
    registration: ListenerHandle,
    commands: ListenerHandle,
}

impl Fabric {
    /// Binds both sockets and starts supervising `manifests`.
    pub fn start(
        config: &Config,
        manifests: Vec<PluginManifest>,
        reporter: Arc<dyn HealthReporter>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Result<Self, FabricError> {
        let registry = Arc::new(PluginRegistry::with_reserved(reserved_namespaces()));
        let manifests = without_reserved(manifests, &registry);
        for manifest in &manifests {
            registry.supervise(manifest.namespace().clone(), manifest.action_names());
        }

        let registration_handler = Arc::new(RegistrationHandler::new(
            Arc::clone(&registry),
            Arc::clone(&reporter),
            SessionTiming::from_config(config),
        ));
        let registration = bind("registration", config.registration_socket())?
            .start(registration_handler)
            .map_err(|source| FabricError::Listener {
                socket: "registration",
                source,
            })?;

        let router = Arc::new(
            Router::from_config(Arc::clone(&registry), config).map_err(FabricError::Client)?,
        );

        let settings = SupervisorSettings {
            registration_socket: plugin_socket_value(registration.endpoint()),
            ..SupervisorSettings::from_config(config)
        };
        let supervisor = Supervisor::start(
            manifests,
            SupervisorContext {
                registry: Arc::clone(&registry),
                launcher,
                reporter,
                settings,
            },
        )?;

        let command_handler = Arc::new(CommandConnectionHandler::new(
            Arc::clone(&router),
            Arc::clone(&registry),
            supervisor.status(),
        ));
        let commands = bind("command", config.command_socket())?
            .start(command_handler)
            .map_err(|source| FabricError::Listener {
                socket: "command",
                source,
            })?;

        info!(
            target: FABRIC_TARGET,
            registration = %registration.endpoint(),
            commands = %commands.endpoint(),
            "plugin fabric started"
        );
        Ok(Self {
            registry,
            router,
            supervisor,
            registration,
            commands,
        })
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Endpoint plugins register on, with any ephemeral port resolved.
    pub fn registration_endpoint(&self) -> &SocketEndpoint {
        self.registration.endpoint()
    }

    /// Endpoint external callers submit commands on.
    pub fn command_endpoint(&self) -> &SocketEndpoint {
        self.commands.endpoint()
    }

    pub fn processes(&self) -> Vec<ProcessSnapshot> {
        self.supervisor.snapshot()
    }

    /// Stops supervision, then both listeners.
    pub fn shutdown(mut self) -> Result<(), FabricError> {
        self.supervisor.shutdown();
        self.commands.shutdown();
        self.registration.shutdown();
        let commands = self.commands.join();
        let registration = self.registration.join();
        commands.map_err(|source| FabricError::Listener {
            socket: "command",
            source,
        })?;
        registration.map_err(|source| FabricError::Listener {
            socket: "registration",
            source,
        })?;
        info!(target: FABRIC_TARGET, "plugin fabric stopped");
        Ok(())
    }
}

fn bind(socket: &'static str, endpoint: &SocketEndpoint) -> Result<SocketListener, FabricError> {
    SocketListener::bind(endpoint).map_err(|source| FabricError::Listener { socket, source })
}

fn reserved_namespaces() -> Vec<Namespace> {
    CoreActions::reserved_namespaces()
        .chain(Namespace::new(DAEMON_NAMESPACE).ok())
        .collect()
}

fn without_reserved(
    manifests: Vec<PluginManifest>,
    registry: &PluginRegistry,
) -> Vec<PluginManifest> {
    manifests
        .into_iter()
        .filter(|manifest| {
            let reserved = registry.is_reserved(manifest.namespace());
            if reserved {
                warn!(
                    target: FABRIC_TARGET,
                    namespace = %manifest.namespace(),
                    root = %manifest.root(),
                    "skipping plugin that claims a reserved namespace"
                );
            }
            !reserved
        })
        .collect()
}
