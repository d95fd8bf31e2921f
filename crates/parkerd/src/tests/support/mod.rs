//! Shared doubles for the daemon's behavioural and unit tests.

mod config_loader;
mod reporter;

pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use reporter::{HealthEvent, RecordingHealthReporter};
