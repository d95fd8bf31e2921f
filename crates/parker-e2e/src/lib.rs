//! Stub plugin used by the end-to-end suite.
//!
//! The stub serves `POST /<namespace>.get` on the address the master hands it
//! in `PARKER_ENDPOINT` and registers itself through `parker-plugin`. Setting
//! [`CRASH_ONCE_ENV`] to a file path makes the first run exit shortly after
//! registering, leaving the file behind so the restarted run stays up.

use std::future::IntoFuture;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::routing::post;
use axum::{Json, Router};
use parker_plugin::{ClientError, ClientSettings};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::net::TcpListener;

/// Path of a marker file; when absent the stub creates it and exits after
/// [`CRASH_DELAY`].
pub const CRASH_ONCE_ENV: &str = "STUB_CRASH_ONCE";

/// How long a crashing stub stays registered before exiting.
pub const CRASH_DELAY: Duration = Duration::from_millis(300);

/// Exit code used by a deliberate crash.
pub const CRASH_EXIT_CODE: u8 = 3;

/// Errors that stop the stub.
#[derive(Debug, Error)]
pub enum StubError {
    /// The launch environment was incomplete.
    #[error(transparent)]
    Client(#[from] ClientError),
    /// Binding or serving the HTTP surface failed.
    #[error("HTTP surface failed on {endpoint}: {source}")]
    Http {
        /// Address the stub tried to serve.
        endpoint: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

#[derive(Clone)]
struct Forecast {
    namespace: String,
}

/// Builds the HTTP surface for `namespace`.
pub fn router(namespace: &str) -> Router {
    Router::new()
        .route(&format!("/{namespace}.get"), post(get))
        .fallback(unknown)
        .with_state(Forecast {
            namespace: namespace.to_owned(),
        })
}

async fn get(State(forecast): State<Forecast>, Json(payload): Json<Value>) -> Json<Value> {
    let location = payload
        .get("locationName")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    Json(json!({
        "plugin": forecast.namespace,
        "location": location,
        "forecast": "light rain",
        "temperature": 12
    }))
}

async fn unknown(uri: Uri) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": format!("no handler for {}", uri.path())})),
    )
}

/// Returns the crash marker when this run should crash.
#[must_use]
pub fn crash_marker(lookup: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    let marker = PathBuf::from(lookup(CRASH_ONCE_ENV)?);
    (!marker.exists()).then_some(marker)
}

/// Binds the HTTP surface, registers with the master, and serves until the
/// process is stopped or a deliberate crash is due.
///
/// Returns `Ok(true)` when the run ended with a deliberate crash.
///
/// # Errors
///
/// Returns [`StubError`] if the environment is incomplete or serving fails.
pub async fn run(settings: ClientSettings, crash: Option<PathBuf>) -> Result<bool, StubError> {
    let endpoint = settings.endpoint.clone();
    let listener = TcpListener::bind(endpoint.as_str())
        .await
        .map_err(|source| StubError::Http {
            endpoint: endpoint.clone(),
            source,
        })?;
    let app = router(settings.namespace.as_str());
    let registration = parker_plugin::spawn(settings.with_actions(["get"]))?;

    let crashed = match crash {
        Some(marker) => {
            let serve = axum::serve(listener, app).into_future();
            tokio::select! {
                result = serve => result.map(|()| false),
                () = tokio::time::sleep(CRASH_DELAY) => {
                    std::fs::write(&marker, b"crashed\n").map(|()| true)
                }
            }
        }
        None => axum::serve(listener, app).await.map(|()| false),
    }
    .map_err(|source| StubError::Http { endpoint, source })?;

    if !crashed {
        registration.stop()?;
    }
    Ok(crashed)
}
