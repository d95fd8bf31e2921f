//! Lock, pid, and health files owned by a running daemon.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{info, warn};

use parker_config::RuntimePaths;

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::files::{atomic_write, remove_if_present};

/// Holds the singleton lock for the lifetime of the daemon and removes every
/// runtime artefact on drop.
#[derive(Debug)]
pub(super) struct ProcessGuard {
    paths: RuntimePaths,
    _lock: File,
    pid: Option<u32>,
}

impl ProcessGuard {
    pub(super) fn acquire(paths: RuntimePaths) -> Result<Self, LaunchError> {
        let lock = acquire_lock(&paths)?;
        Ok(Self {
            paths,
            _lock: lock,
            pid: None,
        })
    }

    pub(super) fn write_pid(&mut self, pid: u32) -> Result<(), LaunchError> {
        let path = self.paths.pid_path();
        atomic_write(path, format!("{pid}\n").as_bytes()).map_err(|source| {
            LaunchError::PidWrite {
                path: path.to_path_buf(),
                source,
            }
        })?;
        self.pid = Some(pid);
        info!(target: PROCESS_TARGET, pid, file = %path.display(), "pid file written");
        Ok(())
    }

    pub(super) fn write_health(&self, state: HealthState) -> Result<(), LaunchError> {
        let pid = self.pid.ok_or(LaunchError::MissingPid)?;
        let snapshot = HealthSnapshot::new(state, pid)?;
        let mut contents = serde_json::to_vec(&snapshot)?;
        contents.push(b'\n');
        let path = self.paths.health_path();
        atomic_write(path, &contents).map_err(|source| LaunchError::HealthWrite {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            target: PROCESS_TARGET,
            status = state.as_str(),
            file = %path.display(),
            "health snapshot updated"
        );
        Ok(())
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        for path in [
            self.paths.health_path(),
            self.paths.pid_path(),
            self.paths.lock_path(),
        ] {
            if let Err(error) = remove_if_present(path) {
                warn!(
                    target: PROCESS_TARGET,
                    file = %path.display(),
                    %error,
                    "failed to remove runtime file"
                );
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(super) enum HealthState {
    Starting,
    Ready,
    Stopping,
}

impl HealthState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthSnapshot {
    status: HealthState,
    pid: u32,
    timestamp: u64,
}

impl HealthSnapshot {
    fn new(status: HealthState, pid: u32) -> Result<Self, LaunchError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|source| LaunchError::Clock { source })?
            .as_secs();
        Ok(Self {
            status,
            pid,
            timestamp,
        })
    }
}

fn acquire_lock(paths: &RuntimePaths) -> Result<File, LaunchError> {
    match open_lock(paths.lock_path()) {
        Ok(file) => {
            info!(
                target: PROCESS_TARGET,
                file = %paths.lock_path().display(),
                "acquired daemon lock"
            );
            Ok(file)
        }
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => reclaim_lock(paths),
        Err(source) => Err(LaunchError::LockCreate {
            path: paths.lock_path().to_path_buf(),
            source,
        }),
    }
}

fn open_lock(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Takes over a lock left behind by a daemon that is no longer running.
fn reclaim_lock(paths: &RuntimePaths) -> Result<File, LaunchError> {
    if let Some(pid) = read_pid(paths.pid_path()) {
        if process_alive(pid)? {
            info!(target: PROCESS_TARGET, pid, "refusing to start: existing daemon alive");
            return Err(LaunchError::AlreadyRunning { pid });
        }
        warn!(target: PROCESS_TARGET, pid, "previous daemon gone; removing stale files");
    }
    for path in [paths.lock_path(), paths.pid_path()] {
        remove_if_present(path).map_err(|source| LaunchError::Cleanup {
            path: path.to_path_buf(),
            source,
        })?;
    }
    open_lock(paths.lock_path()).map_err(|source| LaunchError::LockCreate {
        path: paths.lock_path().to_path_buf(),
        source,
    })
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn process_alive(pid: u32) -> Result<bool, LaunchError> {
    let Ok(raw) = i32::try_from(pid) else {
        return Ok(false);
    };
    if raw == 0 {
        return Ok(false);
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(errno) => Err(LaunchError::CheckProcess { pid, source: errno }),
    }
}
