//! Namespaces and command identifiers.
//!
//! A namespace names one plugin (`music`, `weather`) and must match
//! `[a-z_]+`. A command identifier joins a namespace and an action with a
//! single dot: `weather.get`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validated plugin namespace.
///
/// # Example
///
/// ```
/// use parker_protocol::Namespace;
///
/// let namespace = Namespace::new("weather").expect("valid namespace");
/// assert_eq!(namespace.as_str(), "weather");
/// assert!(Namespace::new("Weather").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    /// Validates and wraps a namespace.
    ///
    /// # Errors
    ///
    /// Returns [`NamespaceError`] when the value is empty or contains a
    /// character outside `[a-z_]`.
    pub fn new(value: impl Into<String>) -> Result<Self, NamespaceError> {
        let value = value.into();
        if value.is_empty() {
            return Err(NamespaceError::Empty);
        }
        if let Some(invalid) = value.chars().find(|c| !matches!(c, 'a'..='z' | '_')) {
            return Err(NamespaceError::InvalidCharacter { value, invalid });
        }
        Ok(Self(value))
    }

    /// Returns the namespace text.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl FromStr for Namespace {
    type Err = NamespaceError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::new(input)
    }
}

impl TryFrom<String> for Namespace {
    type Error = NamespaceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Namespace> for String {
    fn from(namespace: Namespace) -> Self {
        namespace.0
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Errors raised when validating a [`Namespace`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamespaceError {
    /// The namespace was empty.
    #[error("namespace must not be empty")]
    Empty,
    /// The namespace contained a character outside `[a-z_]`.
    #[error("namespace '{value}' contains invalid character '{invalid}'")]
    InvalidCharacter {
        /// Rejected namespace text.
        value: String,
        /// First offending character.
        invalid: char,
    },
}

/// A `<namespace>.<action>` command identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandId {
    namespace: Namespace,
    action: String,
}

impl CommandId {
    /// Builds an identifier from validated parts.
    ///
    /// # Errors
    ///
    /// Returns [`CommandIdError::MissingAction`] when `action` is empty and
    /// [`CommandIdError::ExtraSeparator`] when it contains a dot.
    pub fn new(namespace: Namespace, action: impl Into<String>) -> Result<Self, CommandIdError> {
        let action = action.into();
        if action.is_empty() {
            return Err(CommandIdError::MissingAction {
                input: format!("{namespace}."),
            });
        }
        if action.contains('.') {
            return Err(CommandIdError::ExtraSeparator {
                input: format!("{namespace}.{action}"),
            });
        }
        Ok(Self { namespace, action })
    }

    /// Returns the namespace half.
    #[must_use]
    pub const fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Returns the action half.
    #[must_use]
    pub const fn action(&self) -> &str {
        self.action.as_str()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}.{}", self.namespace, self.action)
    }
}

impl FromStr for CommandId {
    type Err = CommandIdError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let Some((namespace, action)) = input.split_once('.') else {
            return Err(CommandIdError::MissingSeparator {
                input: input.to_owned(),
            });
        };
        if action.contains('.') {
            return Err(CommandIdError::ExtraSeparator {
                input: input.to_owned(),
            });
        }
        if action.is_empty() {
            return Err(CommandIdError::MissingAction {
                input: input.to_owned(),
            });
        }
        let namespace = Namespace::new(namespace).map_err(|source| {
            CommandIdError::InvalidNamespace {
                input: input.to_owned(),
                source,
            }
        })?;
        Ok(Self {
            namespace,
            action: action.to_owned(),
        })
    }
}

/// Errors raised when parsing a [`CommandId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandIdError {
    /// The identifier had no dot.
    #[error("command '{input}' is not of the form <namespace>.<action>")]
    MissingSeparator {
        /// Rejected input.
        input: String,
    },
    /// The identifier had more than one dot.
    #[error("command '{input}' contains more than one '.'")]
    ExtraSeparator {
        /// Rejected input.
        input: String,
    },
    /// The action half was empty.
    #[error("command '{input}' has an empty action")]
    MissingAction {
        /// Rejected input.
        input: String,
    },
    /// The namespace half failed validation.
    #[error("command '{input}' has an invalid namespace: {source}")]
    InvalidNamespace {
        /// Rejected input.
        input: String,
        /// Validation failure.
        #[source]
        source: NamespaceError,
    },
}

/// A command ready for routing: an identifier plus its JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    id: CommandId,
    payload: serde_json::Value,
}

impl Command {
    /// Creates a command from an identifier and payload.
    #[must_use]
    pub const fn new(id: CommandId, payload: serde_json::Value) -> Self {
        Self { id, payload }
    }

    /// Parses the identifier and attaches the payload.
    ///
    /// # Errors
    ///
    /// Returns [`CommandIdError`] when `command` is not a valid identifier.
    pub fn parse(command: &str, payload: serde_json::Value) -> Result<Self, CommandIdError> {
        Ok(Self::new(command.parse()?, payload))
    }

    /// Returns the command identifier.
    #[must_use]
    pub const fn id(&self) -> &CommandId {
        &self.id
    }

    /// Returns the target namespace.
    #[must_use]
    pub const fn namespace(&self) -> &Namespace {
        self.id.namespace()
    }

    /// Returns the action name.
    #[must_use]
    pub const fn action(&self) -> &str {
        self.id.action()
    }

    /// Returns the JSON payload.
    #[must_use]
    pub const fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}
