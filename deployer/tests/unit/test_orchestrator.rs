//! Orchestrator tests against an in-memory file server and trigger

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use remote_deployer::deploy::{
    deploy_with_retry, DeployOrchestrator, DeployState, OrchestratorOptions, RetryPolicy,
};
use remote_deployer::errors::DeployError;
use remote_deployer::fileserver::{FileServer, FileServerOptions};
use remote_deployer::models::artifact::Artifact;
use remote_deployer::models::endpoint::{RemoteEndpoint, Scheme};
use remote_deployer::models::outcome::{DeployPhase, DeploymentOutcome};
use remote_deployer::remote::{FetchTrigger, TriggerAction, TriggerReply};
use url::Url;

/// Observations shared between the fakes and the test
#[derive(Debug, Default, Clone)]
struct Tally {
    fetches: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    starts: Arc<AtomicU32>,
    stops: Arc<AtomicU32>,
    last_grace: Arc<Mutex<Option<Duration>>>,
    requests: Arc<Mutex<Vec<(TriggerAction, Url)>>>,
}

impl Tally {
    fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<(TriggerAction, Url)> {
        self.requests.lock().unwrap().clone()
    }
}

struct FakeServer {
    tally: Tally,
    fail_bind: bool,
    name: Option<String>,
    url: Option<Url>,
}

impl FakeServer {
    fn new(tally: &Tally) -> Self {
        Self {
            tally: tally.clone(),
            fail_bind: false,
            name: None,
            url: None,
        }
    }
}

#[async_trait]
impl FileServer for FakeServer {
    async fn configure(
        &mut self,
        artifact: &Artifact,
        _host: &str,
        _port: u16,
    ) -> Result<(), DeployError> {
        if self.url.is_some() {
            return Err(DeployError::AlreadyStarted);
        }
        self.name = Some(artifact.name().to_string());
        Ok(())
    }

    async fn start(&mut self) -> Result<(), DeployError> {
        if self.fail_bind {
            return Err(DeployError::Bind("127.0.0.1:8000: address in use".to_string()));
        }
        let name = self.name.clone().ok_or(DeployError::NotStarted)?;
        let mut url = Url::parse("http://127.0.0.1:8000/").unwrap();
        url.path_segments_mut().unwrap().push(&name);
        self.url = Some(url);
        self.tally.starts.fetch_add(1, Ordering::SeqCst);
        self.tally.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn url(&self) -> Result<Url, DeployError> {
        self.url.clone().ok_or(DeployError::NotStarted)
    }

    fn call_count(&self) -> u64 {
        self.tally.fetches()
    }

    async fn stop(&mut self, grace: Duration) {
        self.tally.stops.fetch_add(1, Ordering::SeqCst);
        *self.tally.last_grace.lock().unwrap() = Some(grace);
        self.tally.running.store(false, Ordering::SeqCst);
        self.url = None;
    }
}

/// How the fake remote reacts to one trigger
#[derive(Debug, Clone, Copy)]
enum Remote {
    Fetch,
    IgnoreUrl,
    Unauthorized,
    Reject,
    Unreachable,
    Hang,
}

struct FakeTrigger {
    tally: Tally,
    script: Mutex<VecDeque<Remote>>,
    fallback: Remote,
}

impl FakeTrigger {
    /// Play `script` in order, then repeat its last step
    fn new(tally: &Tally, script: &[Remote]) -> Self {
        Self {
            tally: tally.clone(),
            script: Mutex::new(script.iter().copied().collect()),
            fallback: *script.last().unwrap(),
        }
    }
}

#[async_trait]
impl FetchTrigger for FakeTrigger {
    async fn send_fetch_trigger(
        &self,
        _endpoint: &RemoteEndpoint,
        action: TriggerAction,
        pull_url: &Url,
    ) -> Result<TriggerReply, DeployError> {
        self.tally
            .requests
            .lock()
            .unwrap()
            .push((action, pull_url.clone()));
        let step = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);

        match step {
            Remote::Fetch => {
                if self.tally.running.load(Ordering::SeqCst) {
                    self.tally.fetches.fetch_add(1, Ordering::SeqCst);
                }
                Ok(TriggerReply {
                    status: 200,
                    body: "ok".to_string(),
                })
            }
            Remote::IgnoreUrl => Ok(TriggerReply {
                status: 200,
                body: "ok".to_string(),
            }),
            Remote::Unauthorized => Err(DeployError::AuthenticationFailure(
                "401 Unauthorized".to_string(),
            )),
            Remote::Reject => Err(DeployError::RemoteRejected("500 Internal Server Error".to_string())),
            Remote::Unreachable => Err(DeployError::NetworkFailure("connection refused".to_string())),
            Remote::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(TriggerReply {
                    status: 200,
                    body: "late".to_string(),
                })
            }
        }
    }
}

type Orchestrator = DeployOrchestrator<FakeServer, FakeTrigger>;

fn endpoint() -> RemoteEndpoint {
    RemoteEndpoint {
        scheme: Scheme::Http,
        host: "remote.example".to_string(),
        port: 8080,
        credentials: None,
    }
}

fn options() -> OrchestratorOptions {
    OrchestratorOptions {
        file_server: FileServerOptions {
            host: "127.0.0.1".to_string(),
            port: 0,
            shutdown_grace: Duration::from_millis(100),
        },
        timeout: Duration::from_millis(200),
    }
}

fn orchestrator(tally: &Tally, script: &[Remote]) -> Orchestrator {
    DeployOrchestrator::new(
        FakeServer::new(tally),
        FakeTrigger::new(tally, script),
        endpoint(),
        options(),
    )
}

fn artifact(dir: &Path) -> PathBuf {
    let path = dir.join("Report Card.war");
    std::fs::write(&path, b"PK\x03\x04 not really a war").unwrap();
    path
}

fn quick_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy {
        attempts,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    }
}

#[tokio::test]
async fn test_deploy_completes() {
    let dir = tempfile::tempdir().unwrap();
    let path = artifact(dir.path());
    let tally = Tally::default();
    let mut orch = orchestrator(&tally, &[Remote::Fetch]);

    let report = orch.deploy(&path).await.unwrap();

    let staged = Artifact::stage(&path).await.unwrap();
    assert_eq!(report.outcome, DeploymentOutcome::Success);
    assert_eq!(report.action, TriggerAction::Deploy);
    assert_eq!(report.artifact, "Report Card");
    assert_eq!(report.pull_url, "http://127.0.0.1:8000/Report%20Card");
    assert_eq!(report.size, staged.size());
    assert_eq!(report.sha256, staged.sha256());
    assert_eq!(report.fetches, 1);
    assert_eq!(report.remote_status, 200);
    assert!(report.finished_at >= report.started_at);

    assert_eq!(orch.state(), &DeployState::Stopped);
    assert!(orch.fsm().visited(DeployState::Completed));
    assert!(!tally.running.load(Ordering::SeqCst));
    assert_eq!(tally.stops.load(Ordering::SeqCst), 1);
    assert_eq!(
        *tally.last_grace.lock().unwrap(),
        Some(Duration::from_millis(100))
    );

    let requests = tally.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, TriggerAction::Deploy);
    assert_eq!(requests[0].1.as_str(), report.pull_url);
}

#[tokio::test]
async fn test_authentication_failure() {
    let dir = tempfile::tempdir().unwrap();
    let tally = Tally::default();
    let mut orch = orchestrator(&tally, &[Remote::Unauthorized]);

    let failure = orch.deploy(artifact(dir.path())).await.unwrap_err();

    assert_eq!(failure.outcome(), Some(DeploymentOutcome::AuthenticationFailure));
    assert_eq!(failure.phase, DeployPhase::Requesting);
    assert_eq!(tally.fetches(), 0);
    assert!(orch.fsm().visited(DeployState::Failed));
    assert!(!orch.fsm().visited(DeployState::Completed));
    assert_eq!(orch.state(), &DeployState::Stopped);
    assert!(!tally.running.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_success_without_fetch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let tally = Tally::default();
    let mut orch = orchestrator(&tally, &[Remote::IgnoreUrl]);

    let failure = orch.deploy(artifact(dir.path())).await.unwrap_err();

    assert_eq!(failure.outcome(), Some(DeploymentOutcome::RemoteRejected));
    assert_eq!(failure.phase, DeployPhase::Verifying);
    assert!(orch.fsm().visited(DeployState::Verifying));
    assert!(!orch.fsm().visited(DeployState::Completed));
    assert_eq!(orch.state(), &DeployState::Stopped);
}

#[tokio::test]
async fn test_network_failure_stops_server() {
    let dir = tempfile::tempdir().unwrap();
    let tally = Tally::default();
    let mut orch = orchestrator(&tally, &[Remote::Unreachable]);

    let failure = orch.deploy(artifact(dir.path())).await.unwrap_err();

    assert_eq!(failure.outcome(), Some(DeploymentOutcome::NetworkFailure));
    assert_eq!(failure.phase, DeployPhase::Requesting);
    assert!(!tally.running.load(Ordering::SeqCst));
    assert_eq!(tally.stops.load(Ordering::SeqCst), 1);
    assert_eq!(orch.fsm().failure().map(|(phase, _)| phase), Some(DeployPhase::Requesting));
}

#[tokio::test]
async fn test_remote_rejection() {
    let dir = tempfile::tempdir().unwrap();
    let tally = Tally::default();
    let mut orch = orchestrator(&tally, &[Remote::Reject]);

    let failure = orch.deploy(artifact(dir.path())).await.unwrap_err();
    assert_eq!(failure.outcome(), Some(DeploymentOutcome::RemoteRejected));
    assert_eq!(failure.phase, DeployPhase::Requesting);
}

#[tokio::test]
async fn test_timeout_cuts_transfers_short() {
    let dir = tempfile::tempdir().unwrap();
    let tally = Tally::default();
    let mut orch = orchestrator(&tally, &[Remote::Hang]);

    let started = tokio::time::Instant::now();
    let failure = orch.deploy(artifact(dir.path())).await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(failure.outcome(), Some(DeploymentOutcome::Timeout));
    assert_eq!(failure.phase, DeployPhase::Requesting);
    assert!(!orch.fsm().visited(DeployState::Verifying));
    assert_eq!(orch.state(), &DeployState::Stopped);
    assert_eq!(*tally.last_grace.lock().unwrap(), Some(Duration::ZERO));
}

#[tokio::test]
async fn test_staging_failure_never_serves() {
    let dir = tempfile::tempdir().unwrap();
    let tally = Tally::default();
    let mut orch = orchestrator(&tally, &[Remote::Fetch]);

    let failure = orch.deploy(dir.path().join("missing.war")).await.unwrap_err();

    assert_eq!(failure.phase, DeployPhase::Staging);
    assert!(matches!(failure.error, DeployError::Configuration(_)));
    assert_eq!(failure.outcome(), None);
    assert!(!orch.fsm().visited(DeployState::Serving));
    assert_eq!(tally.starts.load(Ordering::SeqCst), 0);
    assert!(tally.requests().is_empty());
    assert_eq!(orch.state(), &DeployState::Stopped);
}

#[tokio::test]
async fn test_malformed_endpoint_never_serves() {
    let dir = tempfile::tempdir().unwrap();
    let tally = Tally::default();
    let mut remote = endpoint();
    remote.host = "bad host".to_string();
    let mut orch = DeployOrchestrator::new(
        FakeServer::new(&tally),
        FakeTrigger::new(&tally, &[Remote::Fetch]),
        remote,
        options(),
    );

    let failure = orch.deploy(artifact(dir.path())).await.unwrap_err();

    assert_eq!(failure.phase, DeployPhase::Staging);
    assert!(matches!(failure.error, DeployError::Configuration(_)));
    assert!(!orch.fsm().visited(DeployState::Serving));
    assert_eq!(tally.starts.load(Ordering::SeqCst), 0);
    assert!(tally.requests().is_empty());
}

#[tokio::test]
async fn test_bind_failure_never_requests() {
    let dir = tempfile::tempdir().unwrap();
    let tally = Tally::default();
    let mut server = FakeServer::new(&tally);
    server.fail_bind = true;
    let mut orch = DeployOrchestrator::new(
        server,
        FakeTrigger::new(&tally, &[Remote::Fetch]),
        endpoint(),
        options(),
    );

    let failure = orch.deploy(artifact(dir.path())).await.unwrap_err();

    assert_eq!(failure.phase, DeployPhase::Binding);
    assert!(matches!(failure.error, DeployError::Bind(_)));
    assert!(orch.fsm().visited(DeployState::Staged));
    assert!(!orch.fsm().visited(DeployState::Requesting));
    assert!(tally.requests().is_empty());
}

#[tokio::test]
async fn test_undeploy_needs_no_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let tally = Tally::default();
    let mut orch = orchestrator(&tally, &[Remote::IgnoreUrl]);

    let report = orch.undeploy(artifact(dir.path())).await.unwrap();

    assert_eq!(report.action, TriggerAction::Undeploy);
    assert_eq!(report.fetches, 0);
    assert!(orch.fsm().visited(DeployState::Completed));
    assert_eq!(tally.requests()[0].0, TriggerAction::Undeploy);
}

#[tokio::test]
async fn test_redeploy_undeploys_then_deploys() {
    let dir = tempfile::tempdir().unwrap();
    let tally = Tally::default();
    let mut orch = orchestrator(&tally, &[Remote::IgnoreUrl, Remote::Fetch]);

    let report = orch.redeploy(artifact(dir.path())).await.unwrap();

    assert_eq!(report.action, TriggerAction::Deploy);
    assert_eq!(report.fetches, 1);
    let requests = tally.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].0, TriggerAction::Undeploy);
    assert_eq!(requests[1].0, TriggerAction::Deploy);
    // Both operations advertise the same URL
    assert_eq!(requests[0].1, requests[1].1);
}

#[tokio::test]
async fn test_redeploy_tolerates_rejected_undeploy() {
    let dir = tempfile::tempdir().unwrap();
    let tally = Tally::default();
    let mut orch = orchestrator(&tally, &[Remote::Reject, Remote::Fetch]);

    let report = orch.redeploy(artifact(dir.path())).await.unwrap();
    assert_eq!(report.outcome, DeploymentOutcome::Success);
    assert_eq!(tally.requests().len(), 2);
}

#[tokio::test]
async fn test_redeploy_stops_on_unreachable_remote() {
    let dir = tempfile::tempdir().unwrap();
    let tally = Tally::default();
    let mut orch = orchestrator(&tally, &[Remote::Unreachable, Remote::Fetch]);

    let failure = orch.redeploy(artifact(dir.path())).await.unwrap_err();
    assert_eq!(failure.outcome(), Some(DeploymentOutcome::NetworkFailure));
    assert_eq!(tally.requests().len(), 1);
}

#[tokio::test]
async fn test_operation_requires_reset() {
    let dir = tempfile::tempdir().unwrap();
    let path = artifact(dir.path());
    let tally = Tally::default();
    let mut orch = orchestrator(&tally, &[Remote::Fetch]);

    orch.deploy(&path).await.unwrap();

    let failure = orch.deploy(&path).await.unwrap_err();
    assert!(matches!(failure.error, DeployError::InvalidTransition(_)));
    assert_eq!(tally.requests().len(), 1);

    orch.reset().unwrap();
    assert_eq!(orch.state(), &DeployState::Idle);
    let report = orch.deploy(&path).await.unwrap();
    assert_eq!(report.fetches, 1);
    assert_eq!(tally.fetches(), 2);

    assert!(orch.reset().is_ok());
    assert!(orch.reset().is_err());
}

#[tokio::test]
async fn test_retry_recovers_from_network_failures() {
    let dir = tempfile::tempdir().unwrap();
    let tally = Tally::default();
    let mut orch = orchestrator(
        &tally,
        &[Remote::Unreachable, Remote::Unreachable, Remote::Fetch],
    );

    let report = deploy_with_retry(&mut orch, artifact(dir.path()), &quick_retry(3))
        .await
        .unwrap();

    assert_eq!(report.fetches, 1);
    assert_eq!(tally.requests().len(), 3);
    assert_eq!(tally.stops.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_gives_up_after_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let tally = Tally::default();
    let mut orch = orchestrator(&tally, &[Remote::Unreachable]);

    let failure = deploy_with_retry(&mut orch, artifact(dir.path()), &quick_retry(2))
        .await
        .unwrap_err();

    assert_eq!(failure.outcome(), Some(DeploymentOutcome::NetworkFailure));
    assert_eq!(tally.requests().len(), 2);
}

#[tokio::test]
async fn test_retry_skips_non_network_failures() {
    let dir = tempfile::tempdir().unwrap();

    for script in [Remote::Unauthorized, Remote::Reject, Remote::IgnoreUrl, Remote::Hang] {
        let tally = Tally::default();
        let mut orch = orchestrator(&tally, &[script, Remote::Fetch]);

        let failure = deploy_with_retry(&mut orch, artifact(dir.path()), &quick_retry(3))
            .await
            .unwrap_err();

        assert!(!failure.error.is_retryable(), "{:?}", script);
        assert_eq!(tally.requests().len(), 1, "{:?}", script);
    }
}
