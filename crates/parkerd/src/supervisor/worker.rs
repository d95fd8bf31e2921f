//! Per-plugin supervision loop.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::manifest::PluginManifest;
use crate::registry::{ConnectionId, RegistryEvent};

use super::{
    ChildProcess, LaunchSpec, ProcessSnapshot, ProcessState, StopSignal, SupervisorContext,
    SupervisorError, SUPERVISOR_TARGET,
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

enum Outcome {
    Exited(String),
    Shutdown,
}

pub(super) struct Worker {
    manifest: PluginManifest,
    spec: LaunchSpec,
    context: SupervisorContext,
    status: Arc<Mutex<ProcessSnapshot>>,
    stop: Arc<StopSignal>,
}

impl Worker {
    pub(super) fn new(
        manifest: PluginManifest,
        context: SupervisorContext,
        status: Arc<Mutex<ProcessSnapshot>>,
        stop: Arc<StopSignal>,
    ) -> Self {
        let spec = LaunchSpec::from_manifest(&manifest, &context.settings.registration_socket);
        Self {
            manifest,
            spec,
            context,
            status,
            stop,
        }
    }

    pub(super) fn run(self) {
        let events = self.context.registry.subscribe();
        let namespace = self.manifest.namespace().clone();
        let mut restarts = 0_u32;

        loop {
            if self.stop.is_set() {
                break;
            }
            while events.try_recv().is_ok() {}

            let reason = match self.launch() {
                Some(child) => match self.watch(child, &events) {
                    Outcome::Exited(reason) => reason,
                    Outcome::Shutdown => break,
                },
                None => "spawn failed".to_owned(),
            };

            self.update(|status| {
                status.state = ProcessState::Stopped;
                status.pid = None;
                status.last_exit_reason = Some(reason.clone());
            });
            self.context.reporter.plugin_exited(&namespace, &reason);

            if let Some(max) = self.context.settings.max_restarts
                && restarts >= max
            {
                let error = SupervisorError::RestartExhausted {
                    namespace: namespace.clone(),
                    restarts,
                };
                self.context.reporter.plugin_failed(&error);
                break;
            }

            let delay = self.context.settings.backoff(restarts);
            restarts = restarts.saturating_add(1);
            self.context
                .reporter
                .plugin_restart_scheduled(&namespace, restarts, delay);
            if self.stop.wait(delay) {
                break;
            }
            self.update(|status| {
                status.restart_count = restarts;
                status.state = ProcessState::Starting;
            });
        }

        self.update(|status| {
            status.state = ProcessState::Stopped;
            status.pid = None;
        });
        debug!(target: SUPERVISOR_TARGET, namespace = %namespace, "supervision ended");
    }

    fn launch(&self) -> Option<Box<dyn ChildProcess>> {
        let namespace = self.manifest.namespace();
        match self.context.launcher.launch(&self.spec) {
            Ok(child) => {
                let pid = child.id();
                info!(
                    target: SUPERVISOR_TARGET,
                    namespace = %namespace,
                    pid,
                    program = %self.spec.program,
                    "plugin launched"
                );
                self.update(|status| {
                    status.state = ProcessState::Starting;
                    status.pid = Some(pid);
                });
                self.context.reporter.plugin_launched(namespace, pid);
                Some(child)
            }
            Err(source) => {
                let error = SupervisorError::Spawn {
                    namespace: namespace.clone(),
                    source: Arc::new(source),
                };
                self.context.reporter.plugin_failed(&error);
                None
            }
        }
    }

    fn watch(
        &self,
        mut child: Box<dyn ChildProcess>,
        events: &Receiver<RegistryEvent>,
    ) -> Outcome {
        let namespace = self.manifest.namespace();
        let window = self.context.settings.readiness_window;
        let mut deadline = Some(Instant::now() + window);
        let mut current: Option<ConnectionId> = None;

        loop {
            if self.stop.is_set() {
                self.terminate(child.as_mut(), current);
                return Outcome::Shutdown;
            }

            match child.try_wait() {
                Ok(Some(reason)) => {
                    self.release(current);
                    return Outcome::Exited(reason);
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(
                        target: SUPERVISOR_TARGET,
                        namespace = %namespace,
                        %error,
                        "failed to poll plugin process"
                    );
                    self.terminate(child.as_mut(), current);
                    return Outcome::Exited(format!("wait failed: {error}"));
                }
            }

            match events.recv_timeout(POLL_INTERVAL) {
                Ok(RegistryEvent::Registered {
                    namespace: registered,
                    generation,
                    connection_id,
                }) if &registered == namespace
                    && self.context.registry.is_current(connection_id) =>
                {
                    current = Some(connection_id);
                    deadline = None;
                    self.update(|status| status.state = ProcessState::Ready);
                    self.context.reporter.plugin_ready(namespace, generation);
                }
                Ok(RegistryEvent::Stale {
                    namespace: stale,
                    connection_id,
                    ..
                }) if &stale == namespace && current == Some(connection_id) => {
                    current = None;
                    deadline = Some(Instant::now() + window);
                    self.update(|status| status.state = ProcessState::Degraded);
                    self.context
                        .reporter
                        .plugin_degraded(namespace, "registration lost");
                }
                Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    if self.stop.wait(POLL_INTERVAL) {
                        continue;
                    }
                }
            }

            if deadline.is_some_and(|limit| Instant::now() >= limit) {
                let reason = "no registration within readiness window";
                self.update(|status| status.state = ProcessState::Degraded);
                self.context.reporter.plugin_degraded(namespace, reason);
                self.terminate(child.as_mut(), current);
                return Outcome::Exited(reason.to_owned());
            }
        }
    }

    fn terminate(&self, child: &mut dyn ChildProcess, current: Option<ConnectionId>) {
        if let Err(error) = child.kill() {
            warn!(
                target: SUPERVISOR_TARGET,
                namespace = %self.manifest.namespace(),
                pid = child.id(),
                %error,
                "failed to kill plugin process"
            );
        }
        self.release(current);
    }

    fn release(&self, current: Option<ConnectionId>) {
        if let Some(connection_id) = current {
            self.context.registry.mark_stale(connection_id);
        }
    }

    fn update(&self, apply: impl FnOnce(&mut ProcessSnapshot)) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut status);
    }
}
