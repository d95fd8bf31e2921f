//! Discovery of `parker.json` plugin manifests.
//!
//! A manifest names the namespace a plugin serves, the command that starts
//! it, and the HTTP address it will listen on. Manifests are found by walking
//! the plugin directory recursively; each plugin is launched from the
//! directory holding its manifest.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use parker_protocol::Namespace;

/// File name recognised as a plugin manifest.
pub const MANIFEST_FILE_NAME: &str = "parker.json";

/// Description of one action a plugin offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestAction {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Declarative description of a supervised plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    name: Namespace,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    address: String,
    #[serde(default)]
    actions: Vec<ManifestAction>,
    #[serde(skip)]
    root: Utf8PathBuf,
}

impl PluginManifest {
    /// Builds a manifest rooted at `root`.
    pub fn new(
        name: Namespace,
        command: impl Into<String>,
        address: impl Into<String>,
        root: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            name,
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            address: address.into(),
            actions: Vec::new(),
            root: root.into(),
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_actions(mut self, actions: Vec<ManifestAction>) -> Self {
        self.actions = actions;
        self
    }

    /// Namespace served by the plugin.
    pub fn namespace(&self) -> &Namespace {
        &self.name
    }

    /// Command as written in the manifest.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// `host:port` the plugin serves HTTP on.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn actions(&self) -> &[ManifestAction] {
        &self.actions
    }

    /// Names of the actions the plugin may be sent; empty allows any.
    pub fn action_names(&self) -> Vec<String> {
        self.actions.iter().map(|action| action.name.clone()).collect()
    }

    /// Directory containing the manifest; the plugin's working directory.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Program to execute.
    ///
    /// Relative paths containing a separator are resolved against the
    /// manifest directory; bare names are left for `PATH` lookup.
    pub fn program(&self) -> Utf8PathBuf {
        let command = Utf8Path::new(&self.command);
        if command.is_relative() && command.components().count() > 1 {
            self.root.join(command)
        } else {
            command.to_path_buf()
        }
    }

    fn validate(&self, path: &Utf8Path) -> Result<(), ManifestError> {
        let invalid = |message: &str| ManifestError::Invalid {
            path: path.to_path_buf(),
            message: message.to_owned(),
        };
        if self.command.trim().is_empty() {
            return Err(invalid("command must not be empty"));
        }
        if self.address.trim().is_empty() {
            return Err(invalid("address must not be empty"));
        }
        Ok(())
    }
}

/// Errors raised while discovering or parsing manifests.
#[derive(Debug, Clone, Error)]
pub enum ManifestError {
    #[error("failed to read plugin directory '{path}': {source}")]
    ReadDirectory {
        path: Utf8PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("failed to read manifest '{path}': {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("failed to parse manifest '{path}': {source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: Arc<serde_json::Error>,
    },
    #[error("invalid manifest '{path}': {message}")]
    Invalid { path: Utf8PathBuf, message: String },
    #[error("namespace '{namespace}' is declared by both '{first}' and '{second}'")]
    Duplicate {
        namespace: Namespace,
        first: Utf8PathBuf,
        second: Utf8PathBuf,
    },
}

/// Loads a single manifest file.
pub fn load(path: &Utf8Path) -> Result<PluginManifest, ManifestError> {
    let text = fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source: Arc::new(source),
    })?;
    let mut manifest: PluginManifest =
        serde_json::from_str(&text).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source: Arc::new(source),
        })?;
    manifest.validate(path)?;
    manifest.root = path
        .parent()
        .map_or_else(|| Utf8PathBuf::from("."), Utf8Path::to_path_buf);
    Ok(manifest)
}

/// Finds every manifest beneath `plugin_dir`, ordered by path.
///
/// A missing directory yields no manifests.
pub fn discover(plugin_dir: &Utf8Path) -> Result<Vec<PluginManifest>, ManifestError> {
    if !plugin_dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    collect(plugin_dir, &mut paths)?;
    paths.sort();

    let mut seen: BTreeMap<Namespace, Utf8PathBuf> = BTreeMap::new();
    let mut manifests = Vec::with_capacity(paths.len());
    for path in paths {
        let manifest = load(&path)?;
        if let Some(first) = seen.get(manifest.namespace()) {
            return Err(ManifestError::Duplicate {
                namespace: manifest.namespace().clone(),
                first: first.clone(),
                second: path,
            });
        }
        seen.insert(manifest.namespace().clone(), path);
        manifests.push(manifest);
    }
    Ok(manifests)
}

fn collect(dir: &Utf8Path, found: &mut Vec<Utf8PathBuf>) -> Result<(), ManifestError> {
    let read_error = |source: io::Error| ManifestError::ReadDirectory {
        path: dir.to_path_buf(),
        source: Arc::new(source),
    };
    for entry in dir.read_dir_utf8().map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        let file_type = entry.file_type().map_err(read_error)?;
        if file_type.is_dir() {
            collect(entry.path(), found)?;
        } else if entry.file_name() == MANIFEST_FILE_NAME {
            found.push(entry.path().to_path_buf());
        }
    }
    Ok(())
}
