//! HTTP client for remote management endpoints

use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use reqwest::Client;
use tracing::{debug, error, info};
use url::Url;

use crate::errors::DeployError;
use crate::models::endpoint::RemoteEndpoint;
use crate::remote::template::ManagementTemplate;
use crate::remote::{FetchTrigger, TriggerAction, TriggerReply};

/// Longest slice of a remote body carried in an error message
const BODY_EXCERPT_LEN: usize = 256;

/// Sends fetch triggers over HTTP with basic authentication
pub struct RemoteFetchClient {
    client: Client,
    template: ManagementTemplate,
    timeout: Duration,
}

impl RemoteFetchClient {
    /// Create a new client with a per-request timeout
    pub fn new(template: ManagementTemplate, timeout: Duration) -> Result<Self, DeployError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeployError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            template,
            timeout,
        })
    }

    /// Get the management template
    pub fn template(&self) -> &ManagementTemplate {
        &self.template
    }

    /// Build the management request URL carrying `pull_url`
    pub fn request_url(
        &self,
        endpoint: &RemoteEndpoint,
        action: TriggerAction,
        pull_url: &Url,
    ) -> Result<Url, DeployError> {
        let base = endpoint.base_url()?;
        self.template.request_url(&base, action, pull_url.as_str())
    }

    /// Ask the endpoint to fetch `pull_url` and wait for its verdict
    pub async fn connect(
        &self,
        endpoint: &RemoteEndpoint,
        action: TriggerAction,
        pull_url: &Url,
    ) -> Result<TriggerReply, DeployError> {
        let url = self.request_url(endpoint, action, pull_url)?;
        debug!("{} {}", self.template.method, url);

        let mut request = self.client.request(self.template.method.clone(), url);
        if let Some(credentials) = &endpoint.credentials {
            request = request.basic_auth(&credentials.username, Some(credentials.password()));
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| body_error(e, self.timeout))?;

        let reply = interpret_response(status, body, &self.template);
        match &reply {
            Ok(_) => info!("Remote accepted {:?} trigger: {}", action, status),
            Err(e) => error!("Remote {:?} trigger failed: {}", action, e),
        }
        reply
    }
}

#[async_trait]
impl FetchTrigger for RemoteFetchClient {
    async fn send_fetch_trigger(
        &self,
        endpoint: &RemoteEndpoint,
        action: TriggerAction,
        pull_url: &Url,
    ) -> Result<TriggerReply, DeployError> {
        self.connect(endpoint, action, pull_url).await
    }
}

/// Classify a received response
pub fn interpret_response(
    status: StatusCode,
    body: String,
    template: &ManagementTemplate,
) -> Result<TriggerReply, DeployError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(DeployError::AuthenticationFailure(status.to_string()));
    }

    if !status.is_success() {
        return Err(DeployError::RemoteRejected(format!(
            "{}: {}",
            status,
            excerpt(&body)
        )));
    }

    if let Some(marker) = template.find_error_marker(&body) {
        return Err(DeployError::RemoteRejected(format!(
            "{} but body reports '{}': {}",
            status,
            marker,
            excerpt(&body)
        )));
    }

    Ok(TriggerReply {
        status: status.as_u16(),
        body,
    })
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> DeployError {
    if err.is_timeout() {
        DeployError::Timeout(timeout)
    } else {
        DeployError::NetworkFailure(err.to_string())
    }
}

fn body_error(err: reqwest::Error, timeout: Duration) -> DeployError {
    if err.is_timeout() {
        DeployError::Timeout(timeout)
    } else if err.is_decode() {
        DeployError::RemoteRejected(format!("malformed response body: {}", err))
    } else {
        DeployError::NetworkFailure(err.to_string())
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
