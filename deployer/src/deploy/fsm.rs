//! Finite state machine for one deploy operation

use serde::{Deserialize, Serialize};

use crate::models::outcome::DeployPhase;

/// Deploy operation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployState {
    /// Nothing staged yet
    Idle,

    /// Artifact resolved and validated
    Staged,

    /// File server started, pull URL servable
    Serving,

    /// Fetch trigger sent, waiting for the remote
    Requesting,

    /// Remote answered, checking the verdict
    Verifying,

    /// Remote fetched and accepted the artifact
    Completed,

    /// Operation failed
    Failed,

    /// File server torn down; terminal until reset
    Stopped,
}

/// Deploy operation event
#[derive(Debug, Clone)]
pub enum DeployEvent {
    /// Artifact validated
    Stage,

    /// File server accepting connections
    Serve,

    /// Fetch trigger sent
    Request,

    /// Remote responded (success or error)
    Respond,

    /// Verdict checked and accepted
    Verified,

    /// Operation failed in a phase
    Fail(DeployPhase, String),

    /// File server stopped
    Stop,

    /// Start over from idle
    Reset,
}

/// Deploy FSM
#[derive(Debug, Clone)]
pub struct DeployFsm {
    state: DeployState,
    failure: Option<(DeployPhase, String)>,
    history: Vec<DeployState>,
}

impl DeployFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self {
            state: DeployState::Idle,
            failure: None,
            history: vec![DeployState::Idle],
        }
    }

    /// Get current state
    pub fn state(&self) -> &DeployState {
        &self.state
    }

    /// Get the failed phase and message if any
    pub fn failure(&self) -> Option<(DeployPhase, &str)> {
        self.failure
            .as_ref()
            .map(|(phase, message)| (*phase, message.as_str()))
    }

    /// States entered since the last reset, in order
    pub fn history(&self) -> &[DeployState] {
        &self.history
    }

    /// Whether a state was entered since the last reset
    pub fn visited(&self, state: DeployState) -> bool {
        self.history.contains(&state)
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeployEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (DeployState::Idle, DeployEvent::Stage) => DeployState::Staged,
            (DeployState::Staged, DeployEvent::Serve) => DeployState::Serving,
            (DeployState::Serving, DeployEvent::Request) => DeployState::Requesting,
            (DeployState::Requesting, DeployEvent::Respond) => DeployState::Verifying,
            (DeployState::Verifying, DeployEvent::Verified) => DeployState::Completed,

            // Failure is reachable from every live state. From Requesting it
            // only happens on timeout, when no response was received.
            (
                DeployState::Idle
                | DeployState::Staged
                | DeployState::Serving
                | DeployState::Requesting
                | DeployState::Verifying,
                DeployEvent::Fail(phase, message),
            ) => {
                self.failure = Some((*phase, message.clone()));
                DeployState::Failed
            }

            (DeployState::Completed | DeployState::Failed, DeployEvent::Stop) => {
                DeployState::Stopped
            }

            (DeployState::Stopped, DeployEvent::Reset) => {
                self.failure = None;
                self.history.clear();
                DeployState::Idle
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        self.history.push(new_state);
        Ok(())
    }

    /// Whether the operation reached a verdict
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            DeployState::Completed | DeployState::Failed | DeployState::Stopped
        )
    }
}

impl Default for DeployFsm {
    fn default() -> Self {
        Self::new()
    }
}
