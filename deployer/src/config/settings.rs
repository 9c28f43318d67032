//! Deployment settings, resolved once from a configuration source

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use http::Method;
use tracing::level_filters::LevelFilter;

use crate::config::source::ConfigSource;
use crate::deploy::orchestrator::OrchestratorOptions;
use crate::deploy::retry::RetryPolicy;
use crate::errors::DeployError;
use crate::fileserver::{parse_host, FileServerOptions};
use crate::logs::LogOptions;
use crate::models::endpoint::{Credentials, RemoteEndpoint, Scheme};
use crate::remote::template::{parse_params, ContainerFamily, ManagementTemplate};

/// Configuration keys
pub mod keys {
    pub const PROTOCOL: &str = "protocol";
    pub const HOSTNAME: &str = "hostname";
    pub const REMOTE_PORT: &str = "remote.port";
    pub const USERNAME: &str = "remote.username";
    pub const PASSWORD: &str = "remote.password";
    pub const TIMEOUT_SECS: &str = "remote.timeout_secs";
    pub const FAMILY: &str = "remote.family";

    pub const MANAGEMENT_METHOD: &str = "management.method";
    pub const MANAGEMENT_PATH: &str = "management.path";
    pub const MANAGEMENT_URL_PARAM: &str = "management.url_param";
    pub const MANAGEMENT_DEPLOY_PARAMS: &str = "management.deploy_params";
    pub const MANAGEMENT_UNDEPLOY_PARAMS: &str = "management.undeploy_params";
    pub const MANAGEMENT_ERROR_MARKERS: &str = "management.error_markers";

    pub const FILESERVER_HOSTNAME: &str = "fileserver.hostname";
    pub const FILESERVER_PORT: &str = "fileserver.port";
    pub const FILESERVER_SHUTDOWN_GRACE_SECS: &str = "fileserver.shutdown_grace_secs";

    pub const RETRY_ATTEMPTS: &str = "retry.attempts";
    pub const RETRY_BASE_DELAY_SECS: &str = "retry.base_delay_secs";
    pub const RETRY_MAX_DELAY_SECS: &str = "retry.max_delay_secs";

    pub const LOG_LEVEL: &str = "log_level";
    pub const LOG_JSON: &str = "log_json";
    pub const LOG_DIR: &str = "log_dir";
}

const DEFAULT_REMOTE_HOST: &str = "localhost";
const DEFAULT_REMOTE_PORT: u16 = 8080;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;
const DEFAULT_RETRY_BASE_DELAY_SECS: u64 = 1;
const DEFAULT_RETRY_MAX_DELAY_SECS: u64 = 30;

/// Everything a deployment needs, resolved up front
#[derive(Debug, Clone)]
pub struct DeploySettings {
    /// Remote management endpoint and credentials
    pub endpoint: RemoteEndpoint,

    /// Shape of the fetch-trigger request
    pub management: ManagementTemplate,

    /// File server and timeout options
    pub orchestrator: OrchestratorOptions,

    /// Caller-side retry policy
    pub retry: RetryPolicy,

    /// Logging options
    pub logging: LogOptions,
}

impl DeploySettings {
    /// Resolve all settings; absent keys fall back to their defaults
    pub fn resolve(source: &dyn ConfigSource) -> Result<Self, DeployError> {
        Ok(Self {
            endpoint: resolve_endpoint(source)?,
            management: resolve_management(source)?,
            orchestrator: resolve_orchestrator(source)?,
            retry: resolve_retry(source)?,
            logging: resolve_logging(source)?,
        })
    }
}

fn resolve_endpoint(source: &dyn ConfigSource) -> Result<RemoteEndpoint, DeployError> {
    let scheme = match lookup(source, keys::PROTOCOL) {
        Some(raw) => raw.parse::<Scheme>()?,
        None => Scheme::default(),
    };

    let host = lookup(source, keys::HOSTNAME).unwrap_or_else(|| DEFAULT_REMOTE_HOST.to_string());
    parse_host(&host)?;

    let port = parse_port(source, keys::REMOTE_PORT, DEFAULT_REMOTE_PORT)?;
    if port == 0 {
        return Err(DeployError::Configuration(format!(
            "{} must not be 0",
            keys::REMOTE_PORT
        )));
    }

    let credentials = match (
        lookup(source, keys::USERNAME),
        lookup(source, keys::PASSWORD),
    ) {
        (Some(username), password) => Some(Credentials::new(username, password.unwrap_or_default())),
        (None, Some(_)) => {
            return Err(DeployError::Configuration(format!(
                "{} is set without {}",
                keys::PASSWORD,
                keys::USERNAME
            )));
        }
        (None, None) => None,
    };

    let endpoint = RemoteEndpoint {
        scheme,
        host,
        port,
        credentials,
    };
    // Any URL problem surfaces here, before a server is started
    endpoint.base_url()?;

    Ok(endpoint)
}

fn resolve_management(source: &dyn ConfigSource) -> Result<ManagementTemplate, DeployError> {
    let family = match lookup(source, keys::FAMILY) {
        Some(raw) => raw.parse::<ContainerFamily>()?,
        None => ContainerFamily::default(),
    };
    let mut template = ManagementTemplate::for_family(family);

    if let Some(raw) = lookup(source, keys::MANAGEMENT_METHOD) {
        template.method = match raw.to_uppercase().as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            other => {
                return Err(DeployError::Configuration(format!(
                    "{} must be GET or POST, got {}",
                    keys::MANAGEMENT_METHOD,
                    other
                )));
            }
        };
    }
    if let Some(path) = lookup(source, keys::MANAGEMENT_PATH) {
        template.path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
    }
    if let Some(param) = lookup(source, keys::MANAGEMENT_URL_PARAM) {
        template.url_param = param;
    }
    if let Some(raw) = lookup(source, keys::MANAGEMENT_DEPLOY_PARAMS) {
        template.deploy_params = parse_params(&raw);
    }
    if let Some(raw) = lookup(source, keys::MANAGEMENT_UNDEPLOY_PARAMS) {
        template.undeploy_params = parse_params(&raw);
    }
    // An explicitly empty value clears the preset markers
    if let Some(raw) = source.get(keys::MANAGEMENT_ERROR_MARKERS) {
        template.error_markers = raw
            .split(',')
            .map(str::trim)
            .filter(|marker| !marker.is_empty())
            .map(str::to_string)
            .collect();
    }

    Ok(template)
}

fn resolve_orchestrator(source: &dyn ConfigSource) -> Result<OrchestratorOptions, DeployError> {
    let defaults = FileServerOptions::default();

    let host = lookup(source, keys::FILESERVER_HOSTNAME).unwrap_or(defaults.host);
    parse_host(&host)?;

    let port = parse_port(source, keys::FILESERVER_PORT, defaults.port)?;
    let shutdown_grace = Duration::from_secs(parse_number(
        source,
        keys::FILESERVER_SHUTDOWN_GRACE_SECS,
        DEFAULT_SHUTDOWN_GRACE_SECS,
    )?);

    let timeout_secs = parse_number(source, keys::TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS)?;
    if timeout_secs == 0 {
        return Err(DeployError::Configuration(format!(
            "{} must be greater than 0",
            keys::TIMEOUT_SECS
        )));
    }

    Ok(OrchestratorOptions {
        file_server: FileServerOptions {
            host,
            port,
            shutdown_grace,
        },
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn resolve_retry(source: &dyn ConfigSource) -> Result<RetryPolicy, DeployError> {
    let attempts: u32 = parse_number(source, keys::RETRY_ATTEMPTS, 1)?;
    let base_delay = parse_number(
        source,
        keys::RETRY_BASE_DELAY_SECS,
        DEFAULT_RETRY_BASE_DELAY_SECS,
    )?;
    let max_delay = parse_number(
        source,
        keys::RETRY_MAX_DELAY_SECS,
        DEFAULT_RETRY_MAX_DELAY_SECS,
    )?;

    Ok(RetryPolicy {
        attempts: attempts.max(1),
        base_delay: Duration::from_secs(base_delay),
        max_delay: Duration::from_secs(max_delay.max(base_delay)),
    })
}

fn resolve_logging(source: &dyn ConfigSource) -> Result<LogOptions, DeployError> {
    let level = parse_number(source, keys::LOG_LEVEL, LevelFilter::INFO)?;

    Ok(LogOptions {
        level,
        json_format: parse_number(source, keys::LOG_JSON, false)?,
        log_dir: lookup(source, keys::LOG_DIR).map(PathBuf::from),
        ..Default::default()
    })
}

/// Non-empty, trimmed value of a key
fn lookup(source: &dyn ConfigSource, key: &str) -> Option<String> {
    source
        .get(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_number<T>(source: &dyn ConfigSource, key: &str, default: T) -> Result<T, DeployError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(source, key) {
        Some(raw) => raw.parse::<T>().map_err(|e| {
            DeployError::Configuration(format!("invalid value '{}' for {}: {}", raw, key, e))
        }),
        None => Ok(default),
    }
}

fn parse_port(source: &dyn ConfigSource, key: &str, default: u16) -> Result<u16, DeployError> {
    parse_number(source, key, default)
}
