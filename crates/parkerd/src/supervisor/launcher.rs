//! Process spawning behind a trait so supervision can run without real
//! children.

use std::collections::BTreeMap;
use std::io;
use std::process::{Child, Command, Stdio};

use camino::Utf8PathBuf;

use parker_protocol::Namespace;

use crate::manifest::PluginManifest;

/// Environment variable carrying the registration socket.
pub const SOCKET_ENV: &str = "PARKER_SOCKET";
/// Environment variable carrying the namespace the plugin must claim.
pub const NAMESPACE_ENV: &str = "PARKER_NAMESPACE";
/// Environment variable carrying the address the plugin must serve on.
pub const ENDPOINT_ENV: &str = "PARKER_ENDPOINT";

/// Everything needed to start one plugin process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub namespace: Namespace,
    pub program: Utf8PathBuf,
    pub args: Vec<String>,
    pub working_dir: Utf8PathBuf,
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    /// Builds the launch description for `manifest`.
    ///
    /// Manifest variables are applied first so the daemon's own values win.
    pub fn from_manifest(manifest: &PluginManifest, registration_socket: &str) -> Self {
        let mut env = manifest.env().clone();
        env.insert(SOCKET_ENV.to_owned(), registration_socket.to_owned());
        env.insert(
            NAMESPACE_ENV.to_owned(),
            manifest.namespace().as_str().to_owned(),
        );
        env.insert(ENDPOINT_ENV.to_owned(), manifest.address().to_owned());
        Self {
            namespace: manifest.namespace().clone(),
            program: manifest.program(),
            args: manifest.args().to_vec(),
            working_dir: manifest.root().to_path_buf(),
            env,
        }
    }
}

/// A running plugin process.
pub trait ChildProcess: Send {
    fn id(&self) -> u32;

    /// Returns a description of the exit once the process has ended.
    fn try_wait(&mut self) -> io::Result<Option<String>>;

    /// Terminates the process and reaps it.
    fn kill(&mut self) -> io::Result<()>;
}

/// Starts plugin processes.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ChildProcess>>;
}

/// Launcher backed by [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ChildProcess>> {
        let child = Command::new(spec.program.as_std_path())
            .args(&spec.args)
            .current_dir(spec.working_dir.as_std_path())
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()?;
        Ok(Box::new(SystemChild { child }))
    }
}

struct SystemChild {
    child: Child,
}

impl ChildProcess for SystemChild {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<String>> {
        Ok(self.child.try_wait()?.map(|status| status.to_string()))
    }

    fn kill(&mut self) -> io::Result<()> {
        match self.child.kill() {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::InvalidInput => {}
            Err(error) => return Err(error),
        }
        self.child.wait().map(drop)
    }
}
