use camino::Utf8PathBuf;
#[cfg(unix)]
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::runtime_dir;

use crate::socket::SocketEndpoint;

/// TCP port for the registration socket when Unix domain sockets are not
/// available. The command socket uses the next port.
pub const DEFAULT_TCP_PORT: u16 = 9780;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default deadline for a plugin's identification frame.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Default heartbeat interval advertised to plugins.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Default allowance beyond the heartbeat interval.
pub const DEFAULT_HEARTBEAT_GRACE_MS: u64 = 5_000;

/// Default deadline for forwarded commands.
pub const DEFAULT_FORWARD_TIMEOUT_MS: u64 = 10_000;

/// Default pause before retrying a forward that failed to connect.
pub const DEFAULT_FORWARD_RETRY_BACKOFF_MS: u64 = 200;

/// Default registration deadline for launched plugins.
pub const DEFAULT_READINESS_WINDOW_MS: u64 = 5_000;

/// Default first restart delay.
pub const DEFAULT_RESTART_BACKOFF_INITIAL_MS: u64 = 1_000;

/// Default restart delay ceiling.
pub const DEFAULT_RESTART_BACKOFF_MAX_MS: u64 = 30_000;

const RUNTIME_NAMESPACE: &str = "parker";

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

pub(crate) fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Default manifest search root, relative to the daemon's working directory.
pub fn default_plugin_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("plugins")
}

/// Default registration socket endpoint.
pub fn default_registration_socket() -> SocketEndpoint {
    socket_endpoint("registration.sock", DEFAULT_TCP_PORT)
}

/// Default command socket endpoint.
pub fn default_command_socket() -> SocketEndpoint {
    socket_endpoint("command.sock", DEFAULT_TCP_PORT.saturating_add(1))
}

pub(crate) const fn handshake_timeout_ms() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_MS
}

pub(crate) const fn heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}

pub(crate) const fn heartbeat_grace_ms() -> u64 {
    DEFAULT_HEARTBEAT_GRACE_MS
}

pub(crate) const fn forward_timeout_ms() -> u64 {
    DEFAULT_FORWARD_TIMEOUT_MS
}

pub(crate) const fn forward_retry_backoff_ms() -> u64 {
    DEFAULT_FORWARD_RETRY_BACKOFF_MS
}

pub(crate) const fn readiness_window_ms() -> u64 {
    DEFAULT_READINESS_WINDOW_MS
}

pub(crate) const fn restart_backoff_initial_ms() -> u64 {
    DEFAULT_RESTART_BACKOFF_INITIAL_MS
}

pub(crate) const fn restart_backoff_max_ms() -> u64 {
    DEFAULT_RESTART_BACKOFF_MAX_MS
}

#[cfg(unix)]
fn socket_endpoint(file_name: &str, _port: u16) -> SocketEndpoint {
    let (mut base, apply_namespace) = match runtime_base_directory() {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };

    base.push(RUNTIME_NAMESPACE);
    if apply_namespace {
        base.push(user_namespace());
    }

    SocketEndpoint::unix(base.join(file_name))
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(unix)]
fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn socket_endpoint(_file_name: &str, port: u16) -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn default_sockets_share_a_runtime_directory() {
        let registration = default_registration_socket();
        let command = default_command_socket();
        let registration_parent = registration
            .unix_path()
            .and_then(|path| path.parent())
            .expect("registration socket should be a unix path");
        let command_parent = command
            .unix_path()
            .and_then(|path| path.parent())
            .expect("command socket should be a unix path");
        assert_eq!(registration_parent, command_parent);
        assert!(registration.to_string().ends_with("registration.sock"));
        assert!(command.to_string().ends_with("command.sock"));
    }
}
