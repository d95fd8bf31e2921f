//! Stub plugin process launched by the master in end-to-end tests.

use std::env;
use std::process::ExitCode;

use parker_e2e::{CRASH_EXIT_CODE, crash_marker, run};
use parker_plugin::ClientSettings;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let settings = match ClientSettings::from_env() {
        Ok(settings) => settings,
        Err(error) => {
            tracing::error!(%error, "stub plugin misconfigured");
            return ExitCode::FAILURE;
        }
    };
    match run(settings, crash_marker(|name| env::var(name).ok())).await {
        Ok(true) => {
            tracing::warn!("stub plugin crashing deliberately");
            ExitCode::from(CRASH_EXIT_CODE)
        }
        Ok(false) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "stub plugin failed");
            ExitCode::FAILURE
        }
    }
}
