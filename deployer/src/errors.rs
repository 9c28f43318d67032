//! Error types for the remote deployer

use std::time::Duration;

use thiserror::Error;

use crate::models::outcome::DeploymentOutcome;

/// Main error type for the remote deployer
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("File server has not been started")]
    NotStarted,

    #[error("File server is already started")]
    AlreadyStarted,

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Authentication failure: {0}")]
    AuthenticationFailure(String),

    #[error("Remote rejected: {0}")]
    RemoteRejected(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl DeployError {
    /// Map a remote-phase error onto the deployment outcome it represents.
    ///
    /// Errors raised before any network action (configuration, binding) have
    /// no outcome of their own and return `None`.
    pub fn outcome(&self) -> Option<DeploymentOutcome> {
        match self {
            DeployError::AuthenticationFailure(_) => Some(DeploymentOutcome::AuthenticationFailure),
            DeployError::NetworkFailure(_) => Some(DeploymentOutcome::NetworkFailure),
            DeployError::RemoteRejected(_) => Some(DeploymentOutcome::RemoteRejected),
            DeployError::Timeout(_) => Some(DeploymentOutcome::Timeout),
            _ => None,
        }
    }

    /// Short name of the error kind, for operator-facing output
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::Configuration(_) => "ConfigurationError",
            DeployError::Bind(_) => "BindError",
            DeployError::NotStarted => "NotStartedError",
            DeployError::AlreadyStarted => "AlreadyStartedError",
            DeployError::NetworkFailure(_) => "NetworkFailure",
            DeployError::AuthenticationFailure(_) => "AuthenticationFailure",
            DeployError::RemoteRejected(_) => "RemoteRejected",
            DeployError::Timeout(_) => "Timeout",
            DeployError::InvalidTransition(_) => "InvalidTransition",
            DeployError::IoError(_) => "IoError",
            DeployError::JsonError(_) => "JsonError",
        }
    }

    /// Whether the caller may safely retry the whole operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeployError::NetworkFailure(_))
    }
}
