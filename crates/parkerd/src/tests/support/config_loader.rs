//! Test configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use parker_config::{Config, SocketEndpoint};
use tempfile::TempDir;

use crate::bootstrap::ConfigLoader;

/// Loader that places both sockets and the plugin directory in a temporary
/// directory.
#[derive(Clone)]
pub struct TestConfigLoader {
    dir: Arc<TempDir>,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temporary runtime directory");
        Self { dir: Arc::new(dir) }
    }

    /// Directory holding sockets and runtime artefacts.
    pub fn runtime_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Directory searched for plugin manifests.
    pub fn plugin_dir(&self) -> PathBuf {
        self.dir.path().join("plugins")
    }

    fn path(&self, name: &str) -> String {
        self.dir
            .path()
            .join(name)
            .to_str()
            .expect("temporary path was not valid UTF-8")
            .to_owned()
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            registration_socket: SocketEndpoint::unix(self.path("registration.sock")),
            command_socket: SocketEndpoint::unix(self.path("command.sock")),
            plugin_dir: self.path("plugins").into(),
            ..Config::default()
        })
    }
}

/// Loader that fails by passing an unsupported socket scheme on the command
/// line.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("parkerd"),
            OsString::from("--registration-socket"),
            OsString::from("invalid://socket"),
        ];
        Config::load_from_iter(args)
    }
}
