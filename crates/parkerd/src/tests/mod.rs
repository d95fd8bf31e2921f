//! Behavioural suites for the master daemon.

mod process_behaviour;
mod routing_behaviour;
pub(crate) mod support;
