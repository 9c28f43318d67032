//! Remote fetch trigger
//!
//! A fetch trigger tells a remote container's management endpoint to pull an
//! artifact from a URL and install it. Each container family only differs in
//! the shape of that request, which is captured by a [`ManagementTemplate`].

pub mod client;
pub mod template;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::DeployError;
use crate::models::endpoint::RemoteEndpoint;

pub use client::RemoteFetchClient;
pub use template::{ContainerFamily, ManagementTemplate};

/// What the remote side is asked to do with the pulled artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerAction {
    Deploy,
    Undeploy,
}

impl TriggerAction {
    /// Whether the remote side is expected to fetch the artifact
    pub fn expects_fetch(&self) -> bool {
        matches!(self, TriggerAction::Deploy)
    }
}

/// Successful answer of the management endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerReply {
    pub status: u16,
    pub body: String,
}

/// Capability to send a fetch trigger to one remote container family.
///
/// Implementations hold no per-operation state; every call is self-contained
/// and performs no retries.
#[async_trait]
pub trait FetchTrigger: Send + Sync {
    async fn send_fetch_trigger(
        &self,
        endpoint: &RemoteEndpoint,
        action: TriggerAction,
        pull_url: &Url,
    ) -> Result<TriggerReply, DeployError>;
}
