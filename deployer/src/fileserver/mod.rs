//! Ephemeral file server
//!
//! Serves one staged artifact over HTTP for the lifetime of a single
//! deployment and counts how many times it was fully served.

pub mod handlers;
pub mod listener;
pub mod server;
pub mod state;

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use url::{Host, Url};

use crate::errors::DeployError;
use crate::models::artifact::Artifact;

pub use server::EphemeralFileServer;

/// Listening options for the file server
#[derive(Debug, Clone)]
pub struct FileServerOptions {
    /// Host to bind to and to advertise in the pull URL
    pub host: String,

    /// Port to listen on, 0 for any free port
    pub port: u16,

    /// How long `stop` waits for in-flight transfers before aborting them
    pub shutdown_grace: Duration,
}

impl Default for FileServerOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 0,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Lifecycle of a server exposing one artifact
#[async_trait]
pub trait FileServer: Send + Sync {
    /// Bind the artifact and listening parameters; must precede `start`
    async fn configure(
        &mut self,
        artifact: &Artifact,
        host: &str,
        port: u16,
    ) -> Result<(), DeployError>;

    /// Open the listening socket
    async fn start(&mut self) -> Result<(), DeployError>;

    /// Fully-qualified pull URL, only while started
    fn url(&self) -> Result<Url, DeployError>;

    /// Number of completed transfers, at any lifecycle stage
    fn call_count(&self) -> u64;

    /// Close the listening socket. Idempotent.
    ///
    /// In-flight transfers get `grace` to finish before they are aborted.
    async fn stop(&mut self, grace: Duration);
}

/// Validate a host name or IP literal
pub fn parse_host(host: &str) -> Result<Host, DeployError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(DeployError::Configuration("host must not be empty".to_string()));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(match ip {
            IpAddr::V4(v4) => Host::Ipv4(v4),
            IpAddr::V6(v6) => Host::Ipv6(v6),
        });
    }

    Host::parse(host)
        .map_err(|e| DeployError::Configuration(format!("invalid host '{}': {}", host, e)))
}

/// Build the pull URL for an artifact name.
///
/// The name becomes a single percent-encoded path segment.
pub fn pull_url(host: &Host, port: u16, name: &str) -> Result<Url, DeployError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(DeployError::Configuration(format!(
            "'{}' cannot be a pull path segment",
            name
        )));
    }

    let mut url = Url::parse(&format!("http://{}:{}/", host, port))
        .map_err(|e| DeployError::Configuration(format!("invalid pull URL: {}", e)))?;

    url.path_segments_mut()
        .map_err(|_| DeployError::Configuration("pull URL cannot carry a path".to_string()))?
        .clear()
        .push(name);

    Ok(url)
}
