//! Caller-side retry around whole deploy operations

use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::deploy::fsm::DeployState;
use crate::deploy::orchestrator::DeployOrchestrator;
use crate::fileserver::FileServer;
use crate::models::outcome::{DeployFailure, DeployPhase, DeploymentReport};
use crate::remote::FetchTrigger;

/// How often and how patiently to retry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,

    /// Wait before the first retry; doubles for every further one
    pub base_delay: Duration,

    /// Upper bound on any single wait
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Wait before retry number `retry` (0 for the first retry)
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Deploy, re-running the whole operation after network failures only.
///
/// Each attempt starts from a reset orchestrator and so takes its own fetch
/// counter baseline.
pub async fn deploy_with_retry<S, T>(
    orchestrator: &mut DeployOrchestrator<S, T>,
    artifact: impl AsRef<Path>,
    policy: &RetryPolicy,
) -> Result<DeploymentReport, DeployFailure>
where
    S: FileServer,
    T: FetchTrigger,
{
    let artifact = artifact.as_ref();
    let attempts = policy.attempts.max(1);
    let mut retry = 0;

    loop {
        if orchestrator.state() == &DeployState::Stopped {
            orchestrator
                .reset()
                .map_err(|e| DeployFailure::new(DeployPhase::Staging, e))?;
        }

        match orchestrator.deploy(artifact).await {
            Ok(report) => return Ok(report),
            Err(failure) if failure.error.is_retryable() && retry + 1 < attempts => {
                let delay = policy.delay(retry);
                retry += 1;
                warn!(
                    "Attempt {}/{} failed: {}; retrying in {:?}",
                    retry, attempts, failure, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(failure) => return Err(failure),
        }
    }
}
