//! The Parker master daemon.
//!
//! Plugins are separate processes that announce themselves on a registration
//! socket, keep their claim alive with heartbeats, and serve actions over
//! HTTP. The daemon keeps a generation-ordered registry of live plugins,
//! forwards `<namespace>.<action>` commands to them, answers a handful of
//! built-in actions itself, and supervises the plugin processes it launched
//! from `parker.json` manifests.
//!
//! The pieces are deliberately separable. [`PluginRegistry`] is the only
//! shared mutable state; [`Router`] and [`Supervisor`] receive it explicitly,
//! and [`Fabric`] assembles them with the two socket listeners for the
//! binary and the end-to-end tests.

mod bootstrap;
mod core_actions;
mod dispatch;
mod fabric;
mod health;
mod manifest;
mod process;
mod registry;
mod router;
mod session;
mod supervisor;
mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use core_actions::{Clock, CoreActions, RESERVED_NAMESPACES, capture_local_offset};
pub use dispatch::{
    CommandConnectionHandler, DispatchError, MAX_REQUEST_BYTES, REQUEST_TIMEOUT, STATUS_COMMAND,
};
pub use fabric::{DAEMON_NAMESPACE, Fabric, FabricError};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use manifest::{MANIFEST_FILE_NAME, ManifestAction, ManifestError, PluginManifest, discover};
pub use process::{
    LaunchError, LaunchPlan, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_daemon,
    run_daemon_with,
};
pub use registry::{
    ClaimError, ConnectionId, PluginRegistration, PluginRegistry, RegistrationRequest,
    RegistryEvent, Resolution, RouteEntry,
};
pub use router::{
    HttpReply, PluginTransport, ReqwestTransport, Response, RouteError, Router, RouterSettings,
    TransportError,
};
pub use session::{HandshakeError, RegistrationHandler, SessionEnd, SessionTiming};
pub use supervisor::{
    ChildProcess, ENDPOINT_ENV, LaunchSpec, NAMESPACE_ENV, ProcessLauncher, ProcessSnapshot,
    ProcessState, SOCKET_ENV, Supervisor, SupervisorContext, SupervisorError, SupervisorSettings,
    SupervisorStatus, SystemLauncher, plugin_socket_value,
};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::{
    ConnectionHandler, ConnectionStream, ListenerError, ListenerHandle, SocketListener,
};

#[cfg(test)]
mod tests;
