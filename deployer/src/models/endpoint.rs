//! Remote endpoint descriptor

use std::fmt;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::errors::DeployError;
use crate::fileserver::parse_host;

/// Protocol spoken to the remote management endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl FromStr for Scheme {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(DeployError::Configuration(format!(
                "unsupported protocol: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Basic authentication credentials
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Where the management endpoint lives and how to authenticate against it.
///
/// Resolved once per operation and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
}

impl RemoteEndpoint {
    /// Root URL of the management endpoint (`scheme://host:port/`)
    ///
    /// IPv6 literals are bracketed.
    pub fn base_url(&self) -> Result<Url, DeployError> {
        let host = parse_host(&self.host)?;
        Url::parse(&format!("{}://{}:{}/", self.scheme, host, self.port)).map_err(|e| {
            DeployError::Configuration(format!(
                "invalid remote endpoint {}:{}: {}",
                self.host, self.port, e
            ))
        })
    }
}
