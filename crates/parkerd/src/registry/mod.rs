//! Live routing table mapping namespaces to plugin endpoints.
//!
//! The registry is the only shared mutable structure in the daemon. Every
//! mutation happens under a single write lock, and subscribers are notified
//! before the lock is released so they observe events in generation order.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use parker_protocol::Namespace;

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Opaque handle identifying one accepted registration connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "conn-{}", self.0)
    }
}

/// An active binding of a namespace to a reachable endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRegistration {
    namespace: Namespace,
    endpoint: String,
    connection_id: ConnectionId,
    registered_at: SystemTime,
    generation: u64,
    actions: Vec<String>,
}

impl PluginRegistration {
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// `host:port` of the plugin's HTTP surface.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn registered_at(&self) -> SystemTime {
        self.registered_at
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Declared actions; empty when the plugin did not declare any.
    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    /// Whether the plugin serves `action`. Plugins that declared nothing
    /// accept every action.
    pub fn serves(&self, action: &str) -> bool {
        self.actions.is_empty() || self.actions.iter().any(|declared| declared == action)
    }
}

/// Input to [`PluginRegistry::register`] and [`PluginRegistry::claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub namespace: Namespace,
    pub endpoint: String,
    pub connection_id: ConnectionId,
    /// Generation previously granted to the caller, presented to reclaim a
    /// namespace it still owns.
    pub reclaim: Option<u64>,
    pub actions: Vec<String>,
}

/// Notifications published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered {
        namespace: Namespace,
        generation: u64,
        connection_id: ConnectionId,
    },
    Stale {
        namespace: Namespace,
        generation: u64,
        connection_id: ConnectionId,
    },
}

impl RegistryEvent {
    pub fn namespace(&self) -> &Namespace {
        match self {
            Self::Registered { namespace, .. } | Self::Stale { namespace, .. } => namespace,
        }
    }
}

/// Reasons a claim is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    #[error("namespace '{namespace}' is held by live generation {generation}")]
    Conflict { namespace: Namespace, generation: u64 },
    #[error("namespace '{namespace}' is reserved for built-in actions")]
    Reserved { namespace: Namespace },
}

/// How a namespace resolves for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A live registration serves the namespace.
    Live(PluginRegistration),
    /// The namespace was registered before or is supervised, but nothing
    /// serves it right now. `last_endpoint` is the endpoint of the most
    /// recent registration, if there was one.
    Unavailable { last_endpoint: Option<String> },
    /// The namespace has never been registered or supervised.
    Unknown,
}

/// Status view of one active registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    pub namespace: Namespace,
    pub endpoint: String,
    pub generation: u64,
    pub connection_id: ConnectionId,
    pub actions: Vec<String>,
    /// Seconds since the Unix epoch.
    pub registered_at: u64,
}

impl From<&PluginRegistration> for RouteEntry {
    fn from(registration: &PluginRegistration) -> Self {
        Self {
            namespace: registration.namespace.clone(),
            endpoint: registration.endpoint.clone(),
            generation: registration.generation,
            connection_id: registration.connection_id,
            actions: registration.actions.clone(),
            registered_at: registration
                .registered_at
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    active: HashMap<Namespace, PluginRegistration>,
    generations: HashMap<Namespace, u64>,
    /// Last registration of namespaces whose connection went stale.
    retired: HashMap<Namespace, PluginRegistration>,
    /// Manifest action lists of supervised namespaces; empty allows any.
    supervised: HashMap<Namespace, Vec<String>>,
    subscribers: Vec<Sender<RegistryEvent>>,
}

impl RegistryState {
    fn publish(&mut self, event: &RegistryEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn announce(&mut self, namespace: Namespace, generation: u64, connection_id: ConnectionId) {
        debug!(
            target: REGISTRY_TARGET,
            namespace = %namespace,
            generation,
            connection = %connection_id,
            subscribers = self.subscribers.len(),
            "publishing registration"
        );
        self.publish(&RegistryEvent::Registered {
            namespace,
            generation,
            connection_id,
        });
    }

    fn insert(&mut self, request: RegistrationRequest) -> u64 {
        let generation = {
            let counter = self
                .generations
                .entry(request.namespace.clone())
                .or_insert(0);
            *counter += 1;
            *counter
        };
        let registration = PluginRegistration {
            namespace: request.namespace.clone(),
            endpoint: request.endpoint,
            connection_id: request.connection_id,
            registered_at: SystemTime::now(),
            generation,
            actions: request.actions,
        };

        self.retired.remove(&request.namespace);
        if let Some(previous) = self.active.insert(request.namespace, registration) {
            info!(
                target: REGISTRY_TARGET,
                namespace = %previous.namespace,
                generation = previous.generation,
                connection = %previous.connection_id,
                "registration superseded"
            );
            self.publish(&RegistryEvent::Stale {
                namespace: previous.namespace,
                generation: previous.generation,
                connection_id: previous.connection_id,
            });
        }
        generation
    }
}

/// Concurrent registry of live plugin registrations.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    state: RwLock<RegistryState>,
    next_connection: AtomicU64,
    reserved: BTreeSet<Namespace>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry that refuses claims on the given namespaces.
    pub fn with_reserved(reserved: impl IntoIterator<Item = Namespace>) -> Self {
        Self {
            reserved: reserved.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Allocates a fresh connection handle.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Inserts or supersedes the registration for a namespace unconditionally.
    ///
    /// Returns the new generation; the first registration of a namespace is
    /// generation 1 and each later one increments it.
    pub fn register(&self, request: RegistrationRequest) -> u64 {
        let mut state = self.write();
        let namespace = request.namespace.clone();
        let connection_id = request.connection_id;
        let generation = state.insert(request);
        state.announce(namespace, generation, connection_id);
        generation
    }

    /// Registers under the first-registration-wins policy.
    ///
    /// A live registration blocks the claim unless the request presents its
    /// generation as a reclaim token, in which case the caller supersedes it.
    pub fn claim(&self, request: RegistrationRequest) -> Result<u64, ClaimError> {
        if self.reserved.contains(&request.namespace) {
            return Err(ClaimError::Reserved {
                namespace: request.namespace,
            });
        }

        let mut state = self.write();
        if let Some(live) = state.active.get(&request.namespace)
            && request.reclaim != Some(live.generation)
        {
            return Err(ClaimError::Conflict {
                namespace: request.namespace,
                generation: live.generation,
            });
        }

        let namespace = request.namespace.clone();
        let connection_id = request.connection_id;
        let generation = state.insert(request);
        state.announce(namespace, generation, connection_id);
        Ok(generation)
    }

    /// Returns the active registration for `namespace`, if any.
    pub fn lookup(&self, namespace: &Namespace) -> Option<PluginRegistration> {
        self.read().active.get(namespace).cloned()
    }

    /// Resolves `namespace` for routing.
    ///
    /// Namespaces that lost their registration, or that are supervised but
    /// have not registered yet, resolve as unavailable rather than unknown.
    pub fn resolve(&self, namespace: &Namespace) -> Resolution {
        let state = self.read();
        if let Some(live) = state.active.get(namespace) {
            return Resolution::Live(live.clone());
        }
        if let Some(retired) = state.retired.get(namespace) {
            return Resolution::Unavailable {
                last_endpoint: Some(retired.endpoint.clone()),
            };
        }
        if state.supervised.contains_key(namespace) {
            return Resolution::Unavailable {
                last_endpoint: None,
            };
        }
        Resolution::Unknown
    }

    /// Records `namespace` as supervised, restricting it to `actions` unless
    /// the list is empty.
    pub fn supervise(&self, namespace: Namespace, actions: Vec<String>) {
        self.write().supervised.insert(namespace, actions);
    }

    /// Whether the manifest of a supervised namespace permits `action`.
    ///
    /// Namespaces without a manifest, or whose manifest lists no actions,
    /// permit everything.
    pub fn permits(&self, namespace: &Namespace, action: &str) -> bool {
        self.read().supervised.get(namespace).is_none_or(|actions| {
            actions.is_empty() || actions.iter().any(|allowed| allowed == action)
        })
    }

    /// Removes the active registration owned by `connection_id`.
    ///
    /// The namespace stays known, so routing reports it as unavailable until
    /// the plugin registers again. Idempotent: returns the removed registration the first time and `None`
    /// afterwards.
    pub fn mark_stale(&self, connection_id: ConnectionId) -> Option<PluginRegistration> {
        let mut state = self.write();
        let namespace = state
            .active
            .values()
            .find(|registration| registration.connection_id == connection_id)
            .map(|registration| registration.namespace.clone())?;
        let removed = state.active.remove(&namespace)?;
        state.retired.insert(namespace, removed.clone());
        info!(
            target: REGISTRY_TARGET,
            namespace = %removed.namespace,
            generation = removed.generation,
            connection = %connection_id,
            "registration marked stale"
        );
        state.publish(&RegistryEvent::Stale {
            namespace: removed.namespace.clone(),
            generation: removed.generation,
            connection_id,
        });
        Some(removed)
    }

    /// Whether `connection_id` still owns an active registration.
    pub fn is_current(&self, connection_id: ConnectionId) -> bool {
        self.read()
            .active
            .values()
            .any(|registration| registration.connection_id == connection_id)
    }

    /// Subscribes to registration and staleness events.
    pub fn subscribe(&self) -> Receiver<RegistryEvent> {
        let (sender, receiver) = mpsc::channel();
        self.write().subscribers.push(sender);
        receiver
    }

    /// Current route entries ordered by namespace.
    pub fn snapshot(&self) -> Vec<RouteEntry> {
        let state = self.read();
        let mut entries: Vec<RouteEntry> = state.active.values().map(RouteEntry::from).collect();
        entries.sort_by(|left, right| left.namespace.cmp(&right.namespace));
        entries
    }

    /// Whether `namespace` is reserved for built-in actions.
    pub fn is_reserved(&self, namespace: &Namespace) -> bool {
        self.reserved.contains(namespace)
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests;
