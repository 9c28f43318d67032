//! Deploy orchestrator
//!
//! Drives one stage → serve → trigger → verify → teardown cycle. The file
//! server is stopped on every path out of an operation, so no listening
//! socket outlives it.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, info_span, warn, Instrument};
use url::Url;

use crate::config::settings::DeploySettings;
use crate::deploy::fsm::{DeployEvent, DeployFsm, DeployState};
use crate::errors::DeployError;
use crate::fileserver::{EphemeralFileServer, FileServer, FileServerOptions};
use crate::models::artifact::Artifact;
use crate::models::endpoint::RemoteEndpoint;
use crate::models::outcome::{DeployFailure, DeployPhase, DeploymentOutcome, DeploymentReport};
use crate::remote::{FetchTrigger, RemoteFetchClient, TriggerAction, TriggerReply};

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Where the file server listens
    pub file_server: FileServerOptions,

    /// Bound on the wait for the remote's answer
    pub timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            file_server: FileServerOptions::default(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Orchestrator wired to a real file server and HTTP client
pub type HttpDeployOrchestrator = DeployOrchestrator<EphemeralFileServer, RemoteFetchClient>;

/// Sequences one deploy operation over a file server and a fetch trigger
pub struct DeployOrchestrator<S, T> {
    server: S,
    trigger: T,
    endpoint: RemoteEndpoint,
    options: OrchestratorOptions,
    fsm: DeployFsm,
}

impl HttpDeployOrchestrator {
    /// Build an orchestrator from resolved settings
    pub fn from_settings(settings: &DeploySettings) -> Result<Self, DeployError> {
        let trigger =
            RemoteFetchClient::new(settings.management.clone(), settings.orchestrator.timeout)?;
        Ok(Self::new(
            EphemeralFileServer::new(),
            trigger,
            settings.endpoint.clone(),
            settings.orchestrator.clone(),
        ))
    }
}

impl<S: FileServer, T: FetchTrigger> DeployOrchestrator<S, T> {
    /// Create a new orchestrator in idle state
    pub fn new(server: S, trigger: T, endpoint: RemoteEndpoint, options: OrchestratorOptions) -> Self {
        Self {
            server,
            trigger,
            endpoint,
            options,
            fsm: DeployFsm::new(),
        }
    }

    /// Get current state
    pub fn state(&self) -> &DeployState {
        self.fsm.state()
    }

    /// Get the state machine
    pub fn fsm(&self) -> &DeployFsm {
        &self.fsm
    }

    /// Get the file server
    pub fn server(&self) -> &S {
        &self.server
    }

    /// Get the fetch trigger
    pub fn trigger(&self) -> &T {
        &self.trigger
    }

    /// Re-enter idle after a finished operation
    pub fn reset(&mut self) -> Result<(), DeployError> {
        self.fsm
            .process(DeployEvent::Reset)
            .map_err(DeployError::InvalidTransition)
    }

    /// Have the remote pull and install the artifact
    pub async fn deploy(&mut self, artifact: impl AsRef<Path>) -> Result<DeploymentReport, DeployFailure> {
        self.run(TriggerAction::Deploy, artifact.as_ref()).await
    }

    /// Have the remote remove the artifact it pulled from the same URL
    pub async fn undeploy(&mut self, artifact: impl AsRef<Path>) -> Result<DeploymentReport, DeployFailure> {
        self.run(TriggerAction::Undeploy, artifact.as_ref()).await
    }

    /// Undeploy, then deploy again.
    ///
    /// A rejected undeploy (typically: nothing deployed yet) does not stop the
    /// deploy; any other undeploy failure does.
    pub async fn redeploy(&mut self, artifact: impl AsRef<Path>) -> Result<DeploymentReport, DeployFailure> {
        let artifact = artifact.as_ref();

        match self.run(TriggerAction::Undeploy, artifact).await {
            Ok(_) => {}
            Err(failure) if matches!(failure.error, DeployError::RemoteRejected(_)) => {
                warn!("Undeploy rejected, deploying anyway: {}", failure);
            }
            Err(failure) => return Err(failure),
        }

        self.reset()
            .map_err(|e| DeployFailure::new(DeployPhase::Staging, e))?;
        self.run(TriggerAction::Deploy, artifact).await
    }

    async fn run(&mut self, action: TriggerAction, artifact: &Path) -> Result<DeploymentReport, DeployFailure> {
        if self.fsm.state() != &DeployState::Idle {
            return Err(DeployFailure::new(
                DeployPhase::Staging,
                DeployError::InvalidTransition(format!(
                    "operation started in state {:?}",
                    self.fsm.state()
                )),
            ));
        }

        let operation_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("operation", id = %operation_id, action = ?action);

        async {
            let result = self.execute(&operation_id, action, artifact).await;

            // Teardown is unconditional. A timed-out transfer is cut short.
            let grace = match &result {
                Err(failure) if matches!(failure.error, DeployError::Timeout(_)) => Duration::ZERO,
                _ => self.options.file_server.shutdown_grace,
            };
            self.server.stop(grace).await;
            if let Err(e) = self.fsm.process(DeployEvent::Stop) {
                warn!("{}", e);
            }

            match &result {
                Ok(report) => info!(
                    "{:?} of '{}' completed ({} fetch(es))",
                    action, report.artifact, report.fetches
                ),
                Err(failure) => warn!("{:?} of {} failed: {}", action, artifact.display(), failure),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &mut self,
        operation_id: &str,
        action: TriggerAction,
        path: &Path,
    ) -> Result<DeploymentReport, DeployFailure> {
        let started_at = Utc::now();

        // Idle -> Staged
        let artifact = match Artifact::stage(path).await {
            Ok(artifact) => artifact,
            Err(e) => return Err(self.fail(DeployPhase::Staging, e)),
        };
        if let Err(e) = self.endpoint.base_url() {
            return Err(self.fail(DeployPhase::Staging, e));
        }
        self.advance(DeployEvent::Stage, DeployPhase::Staging)?;

        // Staged -> Serving
        let FileServerOptions { host, port, .. } = self.options.file_server.clone();
        if let Err(e) = self.server.configure(&artifact, &host, port).await {
            return Err(self.fail(DeployPhase::Binding, e));
        }
        if let Err(e) = self.server.start().await {
            return Err(self.fail(DeployPhase::Binding, e));
        }
        let pull_url = match self.server.url() {
            Ok(url) => url,
            Err(e) => return Err(self.fail(DeployPhase::Binding, e)),
        };
        self.advance(DeployEvent::Serve, DeployPhase::Binding)?;

        // Serving -> Requesting
        let baseline = self.server.call_count();
        self.advance(DeployEvent::Request, DeployPhase::Requesting)?;
        info!("Asking {}:{} to {:?} {}", self.endpoint.host, self.endpoint.port, action, pull_url);

        let reply = self.request(action, &pull_url).await;
        let reply = match reply {
            Ok(reply) => reply,
            // Timeout leaves Requesting without a response
            Err(e @ DeployError::Timeout(_)) => return Err(self.fail(DeployPhase::Requesting, e)),
            Err(e) => {
                self.advance(DeployEvent::Respond, DeployPhase::Requesting)?;
                return Err(self.fail(DeployPhase::Requesting, e));
            }
        };

        // Requesting -> Verifying
        self.advance(DeployEvent::Respond, DeployPhase::Verifying)?;
        let fetches = self.server.call_count().saturating_sub(baseline);
        if action.expects_fetch() && fetches == 0 {
            return Err(self.fail(
                DeployPhase::Verifying,
                DeployError::RemoteRejected(format!(
                    "remote answered {} but never fetched {}",
                    reply.status, pull_url
                )),
            ));
        }
        self.advance(DeployEvent::Verified, DeployPhase::Verifying)?;

        Ok(DeploymentReport {
            operation_id: operation_id.to_string(),
            action,
            outcome: DeploymentOutcome::Success,
            artifact: artifact.name().to_string(),
            pull_url: pull_url.to_string(),
            size: artifact.size(),
            sha256: artifact.sha256().to_string(),
            fetches,
            remote_status: reply.status,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Send the trigger under the operation timeout
    async fn request(&self, action: TriggerAction, pull_url: &Url) -> Result<TriggerReply, DeployError> {
        let timeout = self.options.timeout;
        match tokio::time::timeout(
            timeout,
            self.trigger.send_fetch_trigger(&self.endpoint, action, pull_url),
        )
        .await
        {
            Ok(reply) => reply,
            Err(_) => Err(DeployError::Timeout(timeout)),
        }
    }

    fn advance(&mut self, event: DeployEvent, phase: DeployPhase) -> Result<(), DeployFailure> {
        self.fsm
            .process(event)
            .map_err(|e| DeployFailure::new(phase, DeployError::InvalidTransition(e)))
    }

    fn fail(&mut self, phase: DeployPhase, error: DeployError) -> DeployFailure {
        if let Err(e) = self
            .fsm
            .process(DeployEvent::Fail(phase, error.to_string()))
        {
            warn!("{}", e);
        }
        DeployFailure::new(phase, error)
    }
}
