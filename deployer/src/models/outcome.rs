//! Deployment outcome, report and failure types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::remote::TriggerAction;

/// Final verdict of one orchestrator run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentOutcome {
    Success,
    AuthenticationFailure,
    NetworkFailure,
    RemoteRejected,
    Timeout,
}

/// Phase in which an operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployPhase {
    Staging,
    Binding,
    Requesting,
    Verifying,
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployPhase::Staging => "staging",
            DeployPhase::Binding => "binding",
            DeployPhase::Requesting => "requesting",
            DeployPhase::Verifying => "verifying",
        };
        f.write_str(name)
    }
}

/// A failed operation: which phase broke and why
#[derive(Debug, thiserror::Error)]
#[error("{phase} failed: {error}")]
pub struct DeployFailure {
    pub phase: DeployPhase,
    #[source]
    pub error: DeployError,
}

impl DeployFailure {
    pub fn new(phase: DeployPhase, error: DeployError) -> Self {
        Self { phase, error }
    }

    /// Outcome of the failed run, `None` when it failed before any network action
    pub fn outcome(&self) -> Option<DeploymentOutcome> {
        self.error.outcome()
    }
}

/// Summary of a completed operation
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    pub operation_id: String,
    pub action: TriggerAction,
    pub outcome: DeploymentOutcome,
    pub artifact: String,
    pub pull_url: String,
    pub size: u64,
    pub sha256: String,
    /// Completed fetches observed by the file server during this run
    pub fetches: u64,
    pub remote_status: u16,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
