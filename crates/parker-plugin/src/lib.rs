//! Plugin-side registration client for the Parker plugin fabric.
//!
//! A plugin announces itself to the master daemon over the registration
//! socket named by `PARKER_SOCKET`, then keeps the registration alive with
//! heartbeats. The client runs on its own thread:
//!
//! ```rust,no_run
//! use parker_plugin::{ClientSettings, spawn};
//!
//! # fn main() -> Result<(), parker_plugin::ClientError> {
//! let settings = ClientSettings::from_env()?.with_actions(["get"]);
//! let handle = spawn(settings)?;
//! // ... serve HTTP on PARKER_ENDPOINT ...
//! handle.stop()?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod settings;
mod socket;

#[cfg(test)]
mod tests;

pub use self::client::{Phase, RegistrationHandle, spawn};
pub use self::error::ClientError;
pub use self::settings::{ClientSettings, ENDPOINT_ENV, NAMESPACE_ENV, SOCKET_ENV};
pub use self::socket::RegistrationSocket;
