//! Command socket: one JSONL request in, one JSONL reply out.

mod errors;
mod handler;

pub use errors::DispatchError;
pub use handler::{CommandConnectionHandler, MAX_REQUEST_BYTES, REQUEST_TIMEOUT, STATUS_COMMAND};

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
