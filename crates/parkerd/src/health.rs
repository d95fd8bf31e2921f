//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;
use std::time::Duration;

use parker_config::Config;
use parker_protocol::Namespace;

use crate::bootstrap::BootstrapError;
use crate::session::{HandshakeError, SessionEnd};
use crate::supervisor::SupervisorError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked when a plugin completes the registration handshake.
    fn registration_accepted(&self, namespace: &Namespace, generation: u64, endpoint: &str);

    /// Invoked when a handshake is refused.
    fn registration_rejected(&self, error: &HandshakeError);

    /// Invoked when a registration session ends.
    fn registration_closed(&self, namespace: &Namespace, generation: u64, reason: &SessionEnd);

    /// Invoked after a plugin process is spawned.
    fn plugin_launched(&self, namespace: &Namespace, pid: u32);

    /// Invoked when a supervised plugin becomes ready.
    fn plugin_ready(&self, namespace: &Namespace, generation: u64);

    /// Invoked when a supervised plugin loses its registration.
    fn plugin_degraded(&self, namespace: &Namespace, reason: &str);

    /// Invoked when a supervised plugin process exits.
    fn plugin_exited(&self, namespace: &Namespace, reason: &str);

    /// Invoked before a restart delay begins.
    fn plugin_restart_scheduled(&self, namespace: &Namespace, attempt: u32, delay: Duration);

    /// Invoked when supervision of a plugin fails.
    fn plugin_failed(&self, error: &SupervisorError);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn registration_accepted(&self, namespace: &Namespace, generation: u64, endpoint: &str) {
        (**self).registration_accepted(namespace, generation, endpoint);
    }

    fn registration_rejected(&self, error: &HandshakeError) {
        (**self).registration_rejected(error);
    }

    fn registration_closed(&self, namespace: &Namespace, generation: u64, reason: &SessionEnd) {
        (**self).registration_closed(namespace, generation, reason);
    }

    fn plugin_launched(&self, namespace: &Namespace, pid: u32) {
        (**self).plugin_launched(namespace, pid);
    }

    fn plugin_ready(&self, namespace: &Namespace, generation: u64) {
        (**self).plugin_ready(namespace, generation);
    }

    fn plugin_degraded(&self, namespace: &Namespace, reason: &str) {
        (**self).plugin_degraded(namespace, reason);
    }

    fn plugin_exited(&self, namespace: &Namespace, reason: &str) {
        (**self).plugin_exited(namespace, reason);
    }

    fn plugin_restart_scheduled(&self, namespace: &Namespace, attempt: u32, delay: Duration) {
        (**self).plugin_restart_scheduled(namespace, attempt, delay);
    }

    fn plugin_failed(&self, error: &SupervisorError) {
        (**self).plugin_failed(error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            registration_socket = %config.registration_socket(),
            command_socket = %config.command_socket(),
            plugin_dir = %config.plugin_dir(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn registration_accepted(&self, namespace: &Namespace, generation: u64, endpoint: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "registration_accepted",
            namespace = %namespace,
            generation,
            endpoint,
            "plugin registered"
        );
    }

    fn registration_rejected(&self, error: &HandshakeError) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "registration_rejected",
            reason = %error.reason(),
            error = %error,
            "plugin handshake rejected"
        );
    }

    fn registration_closed(&self, namespace: &Namespace, generation: u64, reason: &SessionEnd) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "registration_closed",
            namespace = %namespace,
            generation,
            reason = %reason,
            "plugin registration ended"
        );
    }

    fn plugin_launched(&self, namespace: &Namespace, pid: u32) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugin_launched",
            namespace = %namespace,
            pid,
            "plugin process started"
        );
    }

    fn plugin_ready(&self, namespace: &Namespace, generation: u64) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugin_ready",
            namespace = %namespace,
            generation,
            "plugin ready"
        );
    }

    fn plugin_degraded(&self, namespace: &Namespace, reason: &str) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "plugin_degraded",
            namespace = %namespace,
            reason,
            "plugin degraded"
        );
    }

    fn plugin_exited(&self, namespace: &Namespace, reason: &str) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "plugin_exited",
            namespace = %namespace,
            reason,
            "plugin process exited"
        );
    }

    fn plugin_restart_scheduled(&self, namespace: &Namespace, attempt: u32, delay: Duration) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugin_restart_scheduled",
            namespace = %namespace,
            attempt,
            delay_ms = delay.as_millis(),
            "plugin restart scheduled"
        );
    }

    fn plugin_failed(&self, error: &SupervisorError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "plugin_failed",
            namespace = %error.namespace(),
            error = %error,
            "plugin supervision failed"
        );
    }
}
