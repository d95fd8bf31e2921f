//! HTTP transport used to reach plugin command surfaces.

use std::time::Duration;

use reqwest::blocking::Client;
use thiserror::Error;
use url::Url;

/// Raw HTTP answer from a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Transport failures, classified for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No connection could be established.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The request did not complete before the deadline.
    #[error("request timed out")]
    Timeout,
    /// Any other HTTP failure.
    #[error("{0}")]
    Other(String),
}

/// Sends a JSON payload to a plugin endpoint.
pub trait PluginTransport: Send + Sync {
    fn post(&self, url: &Url, payload: &serde_json::Value) -> Result<HttpReply, TransportError>;
}

/// Production transport backed by a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Builds a client whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl PluginTransport for ReqwestTransport {
    fn post(&self, url: &Url, payload: &serde_json::Value) -> Result<HttpReply, TransportError> {
        let response = self
            .client
            .post(url.clone())
            .json(payload)
            .send()
            .map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(classify)?;
        Ok(HttpReply {
            status,
            body: body.to_vec(),
        })
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}
