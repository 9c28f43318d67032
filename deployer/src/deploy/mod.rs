//! Deployment module

pub mod fsm;
pub mod orchestrator;
pub mod retry;

pub use fsm::{DeployEvent, DeployFsm, DeployState};
pub use orchestrator::{DeployOrchestrator, HttpDeployOrchestrator, OrchestratorOptions};
pub use retry::{deploy_with_retry, RetryPolicy};
