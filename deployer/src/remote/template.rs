//! Management request templates per container family

use std::str::FromStr;

use http::Method;
use url::Url;

use crate::errors::DeployError;
use crate::remote::TriggerAction;

/// Known remote container families
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContainerFamily {
    /// JBoss JMX console, MainDeployer MBean
    #[default]
    JBoss,
    /// Plain `POST /deploy?url=...` endpoint
    Generic,
}

impl FromStr for ContainerFamily {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "jboss" => Ok(ContainerFamily::JBoss),
            "generic" => Ok(ContainerFamily::Generic),
            other => Err(DeployError::Configuration(format!(
                "unknown remote container family: {}",
                other
            ))),
        }
    }
}

/// Shape of the fetch-trigger request.
///
/// The pull URL is always appended as the single query parameter
/// `url_param`, form-encoded as one opaque value after the fixed parameters
/// of the requested action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagementTemplate {
    pub method: Method,
    pub path: String,
    pub url_param: String,
    pub deploy_params: Vec<(String, String)>,
    pub undeploy_params: Vec<(String, String)>,
    /// A 2xx body containing any of these is a rejection
    pub error_markers: Vec<String>,
}

impl ManagementTemplate {
    /// Preset for a container family
    pub fn for_family(family: ContainerFamily) -> Self {
        match family {
            ContainerFamily::JBoss => Self::jboss(),
            ContainerFamily::Generic => Self::generic(),
        }
    }

    pub fn jboss() -> Self {
        let main_deployer = |method: &str| {
            pairs(&[
                ("action", "invokeOpByName"),
                ("name", "jboss.system:service=MainDeployer"),
                ("methodName", method),
                ("argType", "java.net.URL"),
            ])
        };

        Self {
            method: Method::GET,
            path: "/jmx-console/HtmlAdaptor".to_string(),
            url_param: "arg0".to_string(),
            deploy_params: main_deployer("deploy"),
            undeploy_params: main_deployer("undeploy"),
            error_markers: vec!["Exception".to_string()],
        }
    }

    pub fn generic() -> Self {
        Self {
            method: Method::POST,
            path: "/deploy".to_string(),
            url_param: "url".to_string(),
            deploy_params: pairs(&[("action", "deploy")]),
            undeploy_params: pairs(&[("action", "undeploy")]),
            error_markers: Vec::new(),
        }
    }

    /// Fixed parameters of an action
    pub fn params(&self, action: TriggerAction) -> &[(String, String)] {
        match action {
            TriggerAction::Deploy => &self.deploy_params,
            TriggerAction::Undeploy => &self.undeploy_params,
        }
    }

    /// Build the request URL against the endpoint root
    pub fn request_url(
        &self,
        base: &Url,
        action: TriggerAction,
        pull_url: &str,
    ) -> Result<Url, DeployError> {
        let mut url = base.join(&self.path).map_err(|e| {
            DeployError::Configuration(format!("invalid management path {}: {}", self.path, e))
        })?;

        {
            let mut query = url.query_pairs_mut();
            query.extend_pairs(self.params(action));
            query.append_pair(&self.url_param, pull_url);
        }

        Ok(url)
    }

    /// First error marker found in a response body
    pub fn find_error_marker(&self, body: &str) -> Option<&str> {
        self.error_markers
            .iter()
            .map(String::as_str)
            .find(|marker| !marker.is_empty() && body.contains(marker))
    }
}

impl Default for ManagementTemplate {
    fn default() -> Self {
        Self::jboss()
    }
}

/// Parse `k=v&k=v` into owned pairs
pub fn parse_params(raw: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .collect()
}

fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
    raw.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
