//! Test double for [`HealthReporter`] that records structured events for assertions.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use parker_config::Config;
use parker_protocol::Namespace;

use crate::bootstrap::BootstrapError;
use crate::health::HealthReporter;
use crate::session::{HandshakeError, SessionEnd};
use crate::supervisor::SupervisorError;

/// Structured health events tracked during tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    RegistrationAccepted {
        namespace: String,
        generation: u64,
        endpoint: String,
    },
    RegistrationRejected(String),
    RegistrationClosed {
        namespace: String,
        generation: u64,
        reason: String,
    },
    PluginLaunched {
        namespace: String,
        pid: u32,
    },
    PluginReady {
        namespace: String,
        generation: u64,
    },
    PluginDegraded {
        namespace: String,
        reason: String,
    },
    PluginExited {
        namespace: String,
        reason: String,
    },
    RestartScheduled {
        namespace: String,
        attempt: u32,
        delay: Duration,
    },
    PluginFailed(String),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    pub fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }

    /// Polls until an event satisfies `predicate` or `timeout` elapses.
    pub fn wait_for(&self, timeout: Duration, predicate: impl Fn(&HealthEvent) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.events().iter().any(&predicate) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn registration_accepted(&self, namespace: &Namespace, generation: u64, endpoint: &str) {
        self.record(HealthEvent::RegistrationAccepted {
            namespace: namespace.to_string(),
            generation,
            endpoint: endpoint.to_owned(),
        });
    }

    fn registration_rejected(&self, error: &HandshakeError) {
        self.record(HealthEvent::RegistrationRejected(
            error.reason().as_str().to_owned(),
        ));
    }

    fn registration_closed(&self, namespace: &Namespace, generation: u64, reason: &SessionEnd) {
        self.record(HealthEvent::RegistrationClosed {
            namespace: namespace.to_string(),
            generation,
            reason: reason.to_string(),
        });
    }

    fn plugin_launched(&self, namespace: &Namespace, pid: u32) {
        self.record(HealthEvent::PluginLaunched {
            namespace: namespace.to_string(),
            pid,
        });
    }

    fn plugin_ready(&self, namespace: &Namespace, generation: u64) {
        self.record(HealthEvent::PluginReady {
            namespace: namespace.to_string(),
            generation,
        });
    }

    fn plugin_degraded(&self, namespace: &Namespace, reason: &str) {
        self.record(HealthEvent::PluginDegraded {
            namespace: namespace.to_string(),
            reason: reason.to_owned(),
        });
    }

    fn plugin_exited(&self, namespace: &Namespace, reason: &str) {
        self.record(HealthEvent::PluginExited {
            namespace: namespace.to_string(),
            reason: reason.to_owned(),
        });
    }

    fn plugin_restart_scheduled(&self, namespace: &Namespace, attempt: u32, delay: Duration) {
        self.record(HealthEvent::RestartScheduled {
            namespace: namespace.to_string(),
            attempt,
            delay,
        });
    }

    fn plugin_failed(&self, error: &SupervisorError) {
        self.record(HealthEvent::PluginFailed(error.to_string()));
    }
}
