//! Shared configuration for the Parker master daemon and its plugins.
//!
//! Configuration is layered by [`ortho_config`]: built-in defaults, then an
//! optional configuration file, then `PARKER_*` environment variables, then
//! command-line flags. Every timing knob is expressed in milliseconds so the
//! values survive the round trip through environment variables and TOML
//! without a custom duration syntax.

mod defaults;
mod logging;
mod runtime;
mod socket;

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_FORWARD_RETRY_BACKOFF_MS, DEFAULT_FORWARD_TIMEOUT_MS, DEFAULT_HANDSHAKE_TIMEOUT_MS,
    DEFAULT_HEARTBEAT_GRACE_MS, DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_LOG_FILTER,
    DEFAULT_READINESS_WINDOW_MS, DEFAULT_RESTART_BACKOFF_INITIAL_MS,
    DEFAULT_RESTART_BACKOFF_MAX_MS, DEFAULT_TCP_PORT, default_command_socket,
    default_log_filter, default_log_format, default_plugin_dir, default_registration_socket,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::{RuntimePaths, RuntimePathsError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved configuration for the master daemon.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "PARKER")]
pub struct Config {
    /// Socket on which plugins announce themselves.
    #[serde(default = "defaults::default_registration_socket")]
    pub registration_socket: SocketEndpoint,
    /// Socket on which external callers submit commands.
    #[serde(default = "defaults::default_command_socket")]
    pub command_socket: SocketEndpoint,
    /// Directory searched recursively for `parker.json` plugin manifests.
    #[serde(default = "defaults::default_plugin_dir")]
    pub plugin_dir: Utf8PathBuf,
    /// `tracing` filter expression.
    #[serde(default = "defaults::default_log_filter_string")]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "defaults::default_log_format")]
    pub log_format: LogFormat,
    /// Deadline for a plugin's identification frame.
    #[serde(default = "defaults::handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Interval at which plugins are expected to send heartbeats.
    #[serde(default = "defaults::heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Extra allowance on top of the heartbeat interval before a plugin is
    /// declared stale.
    #[serde(default = "defaults::heartbeat_grace_ms")]
    pub heartbeat_grace_ms: u64,
    /// Deadline for a single forwarded command.
    #[serde(default = "defaults::forward_timeout_ms")]
    pub forward_timeout_ms: u64,
    /// Pause before the single retry of a forward that failed to connect.
    #[serde(default = "defaults::forward_retry_backoff_ms")]
    pub forward_retry_backoff_ms: u64,
    /// Time a freshly launched plugin has to complete registration.
    #[serde(default = "defaults::readiness_window_ms")]
    pub readiness_window_ms: u64,
    /// First restart delay; doubles after each consecutive restart.
    #[serde(default = "defaults::restart_backoff_initial_ms")]
    pub restart_backoff_initial_ms: u64,
    /// Upper bound for the restart delay.
    #[serde(default = "defaults::restart_backoff_max_ms")]
    pub restart_backoff_max_ms: u64,
    /// Restarts allowed per plugin before it is left stopped. Unlimited when
    /// absent.
    #[serde(default)]
    pub max_restarts: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registration_socket: default_registration_socket(),
            command_socket: default_command_socket(),
            plugin_dir: default_plugin_dir(),
            log_filter: defaults::default_log_filter_string(),
            log_format: default_log_format(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            heartbeat_grace_ms: DEFAULT_HEARTBEAT_GRACE_MS,
            forward_timeout_ms: DEFAULT_FORWARD_TIMEOUT_MS,
            forward_retry_backoff_ms: DEFAULT_FORWARD_RETRY_BACKOFF_MS,
            readiness_window_ms: DEFAULT_READINESS_WINDOW_MS,
            restart_backoff_initial_ms: DEFAULT_RESTART_BACKOFF_INITIAL_MS,
            restart_backoff_max_ms: DEFAULT_RESTART_BACKOFF_MAX_MS,
            max_restarts: None,
        }
    }
}

impl Config {
    /// Endpoint plugins connect to for registration.
    #[must_use]
    pub fn registration_socket(&self) -> &SocketEndpoint {
        &self.registration_socket
    }

    /// Endpoint external callers use to submit commands.
    #[must_use]
    pub fn command_socket(&self) -> &SocketEndpoint {
        &self.command_socket
    }

    /// Root of the plugin manifest search.
    #[must_use]
    pub fn plugin_dir(&self) -> &Utf8PathBuf {
        &self.plugin_dir
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Handshake deadline.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Advertised heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Longest silence tolerated on a liveness channel.
    #[must_use]
    pub fn liveness_deadline(&self) -> Duration {
        Duration::from_millis(
            self.heartbeat_interval_ms
                .saturating_add(self.heartbeat_grace_ms),
        )
    }

    /// Deadline for a forwarded command.
    #[must_use]
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    /// Delay before retrying a forward that could not connect.
    #[must_use]
    pub fn forward_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.forward_retry_backoff_ms)
    }

    /// Registration deadline for newly launched plugins.
    #[must_use]
    pub fn readiness_window(&self) -> Duration {
        Duration::from_millis(self.readiness_window_ms)
    }

    /// Initial restart delay.
    #[must_use]
    pub fn restart_backoff_initial(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_initial_ms)
    }

    /// Restart delay ceiling.
    #[must_use]
    pub fn restart_backoff_max(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_max_ms)
    }

    /// Restart budget per plugin, if bounded.
    #[must_use]
    pub fn max_restarts(&self) -> Option<u32> {
        self.max_restarts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liveness_deadline_adds_grace_to_interval() {
        let config = Config {
            heartbeat_interval_ms: 30_000,
            heartbeat_grace_ms: 5_000,
            ..Config::default()
        };
        assert_eq!(config.liveness_deadline(), Duration::from_secs(35));
    }

    #[test]
    fn defaults_leave_restarts_unbounded() {
        let config = Config::default();
        assert_eq!(config.max_restarts(), None);
        assert_eq!(config.forward_timeout(), Duration::from_secs(10));
        assert_eq!(config.forward_retry_backoff(), Duration::from_millis(200));
        assert_eq!(config.readiness_window(), Duration::from_secs(5));
    }

    #[test]
    fn liveness_deadline_saturates() {
        let config = Config {
            heartbeat_interval_ms: u64::MAX,
            heartbeat_grace_ms: 1,
            ..Config::default()
        };
        assert_eq!(config.liveness_deadline(), Duration::from_millis(u64::MAX));
    }
}
