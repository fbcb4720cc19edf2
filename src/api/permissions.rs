//! Executor invoke permissions
//!
//! An agent can only call an action group executor that allows it to. The
//! grant is a resource policy statement on the executor function.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::core::{AgentformError, Config, Result};

/// Principal the agent service runs as
pub const AGENT_SERVICE_PRINCIPAL: &str = "bedrock.amazonaws.com";

/// Grants agents permission to invoke executors
#[async_trait]
pub trait ExecutorPermissions: Send + Sync {
    /// Allow `agent_arn` to invoke `executor`. An existing grant is success.
    async fn grant_invoke(&self, executor: &str, agent_name: &str, agent_arn: &str)
        -> Result<()>;
}

/// Statement id used for the grant; one per agent name
pub fn statement_id(agent_name: &str) -> String {
    format!("allowInvoke-{}", agent_name)
}

/// Used when grants are disabled or handled elsewhere
#[derive(Debug, Default, Clone)]
pub struct NoopPermissions;

#[async_trait]
impl ExecutorPermissions for NoopPermissions {
    async fn grant_invoke(&self, executor: &str, agent_name: &str, _agent_arn: &str) -> Result<()> {
        tracing::debug!(executor, agent_name, "skipping executor permission grant");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AddPermissionRequest<'a> {
    statement_id: String,
    action: &'a str,
    principal: &'a str,
    source_arn: &'a str,
}

/// Function-policy client for the function management API
#[derive(Clone)]
pub struct LambdaPermissions {
    client: Client,
    base_url: Url,
    bearer_token: Option<String>,
}

impl LambdaPermissions {
    /// Create a client from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut permissions = Self::with_base_url(&config.lambda_endpoint())?;
        permissions.client = Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .build()?;
        permissions.bearer_token = config.api.bearer_token.clone();
        Ok(permissions)
    }

    /// Create a client with custom base URL
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            AgentformError::config(format!("Invalid function endpoint {}: {}", base_url, e))
        })?;

        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(30)).build()?,
            base_url,
            bearer_token: None,
        })
    }

    /// `/2015-03-31/functions/{executor}/policy`, the ARN kept as one path segment
    fn policy_url(&self, executor: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AgentformError::config("Function endpoint cannot be a base URL"))?
            .pop_if_empty()
            .extend(["2015-03-31", "functions", executor, "policy"]);
        Ok(url)
    }
}

#[async_trait]
impl ExecutorPermissions for LambdaPermissions {
    async fn grant_invoke(
        &self,
        executor: &str,
        agent_name: &str,
        agent_arn: &str,
    ) -> Result<()> {
        let body = AddPermissionRequest {
            statement_id: statement_id(agent_name),
            action: "lambda:InvokeFunction",
            principal: AGENT_SERVICE_PRINCIPAL,
            source_arn: agent_arn,
        };

        let mut request = self.client.post(self.policy_url(executor)?).json(&body);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            tracing::info!(executor, agent_name, "granted executor invoke permission");
            return Ok(());
        }
        if status == StatusCode::CONFLICT {
            tracing::debug!(executor, agent_name, "executor invoke permission already present");
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => AgentformError::NotFound(message),
            StatusCode::TOO_MANY_REQUESTS => AgentformError::Throttled(message),
            s if s.is_server_error() => AgentformError::ServiceFault(message),
            s => AgentformError::Rejected {
                status: s.as_u16(),
                message,
            },
        })
    }
}
