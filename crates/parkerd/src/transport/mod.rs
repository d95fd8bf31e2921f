//! Socket listener shared by the registration and command endpoints.
//!
//! The transport module binds to configured socket endpoints and accepts
//! connections in a background thread, handing each to its own thread.

mod errors;
mod handler;
mod listener;

pub use self::errors::ListenerError;
pub use self::handler::{ConnectionHandler, ConnectionStream};
pub use self::listener::{ListenerHandle, SocketListener};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
