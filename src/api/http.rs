//! Management API client implementation
//!
//! Async HTTP client for the agent management REST API.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::api::traits::AgentApi;
use crate::core::{
    ActionGroupRecord, ActionGroupSpec, ActionGroupStatus, ActionGroupSummary, AgentDesiredState,
    AgentRecord, AgentStatus, AgentSummary, AgentformError, Config, Result, S3Location,
};

const LIST_PAGE_SIZE: u32 = 100;

/// Agent management API client
#[derive(Clone)]
pub struct HttpAgentApi {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
    debug: bool,
}

/// Create/update agent request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentRequest<'a> {
    agent_name: &'a str,
    agent_resource_role_arn: &'a str,
    foundation_model: &'a str,
    #[serde(rename = "idleSessionTTLInSeconds")]
    idle_session_ttl: u32,
    instruction: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_token: Option<&'a str>,
}

/// Agent as returned by the API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAgent {
    agent_id: String,
    agent_name: String,
    #[serde(default)]
    agent_arn: String,
    agent_status: AgentStatus,
    #[serde(default)]
    agent_version: Option<String>,
    #[serde(default)]
    instruction: Option<String>,
    #[serde(default)]
    foundation_model: Option<String>,
    #[serde(default)]
    agent_resource_role_arn: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "idleSessionTTLInSeconds")]
    idle_session_ttl: u32,
    #[serde(default)]
    failure_reasons: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AgentEnvelope {
    agent: WireAgent,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListRequest<'a> {
    max_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListAgentsResponse {
    #[serde(default)]
    agent_summaries: Vec<WireAgentSummary>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAgentSummary {
    agent_id: String,
    agent_name: String,
    agent_status: AgentStatus,
}

/// Executor reference in action group bodies
#[derive(Debug, Serialize, Deserialize)]
struct WireExecutor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lambda: Option<String>,
}

/// Schema location in action group bodies
#[derive(Debug, Serialize, Deserialize)]
struct WireApiSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s3: Option<S3Location>,
}

/// Create/update action group request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionGroupRequest<'a> {
    action_group_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    action_group_executor: Option<WireExecutor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_schema: Option<WireApiSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    action_group_state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_token: Option<String>,
}

/// Action group as returned by the API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireActionGroup {
    action_group_id: String,
    action_group_name: String,
    agent_id: String,
    #[serde(default)]
    action_group_state: Option<String>,
    #[serde(default)]
    action_group_status: Option<ActionGroupStatus>,
    #[serde(default)]
    action_group_executor: Option<WireExecutor>,
    #[serde(default)]
    api_schema: Option<WireApiSchema>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionGroupEnvelope {
    agent_action_group: WireActionGroup,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListActionGroupsResponse {
    #[serde(default)]
    action_group_summaries: Vec<WireActionGroupSummary>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireActionGroupSummary {
    action_group_id: String,
    action_group_name: String,
    #[serde(default)]
    action_group_state: Option<String>,
    #[serde(default)]
    action_group_status: Option<ActionGroupStatus>,
}

/// Error body; the service is inconsistent about the key's casing
#[derive(Debug, Default, Deserialize)]
struct WireError {
    #[serde(default, alias = "Message")]
    message: Option<String>,
}

/// Explicit status wins, otherwise derive it from the enabled/disabled state
fn action_group_status(
    status: Option<ActionGroupStatus>,
    state: Option<&str>,
) -> ActionGroupStatus {
    match (status, state) {
        (Some(status), _) => status,
        (None, Some("DISABLED")) => ActionGroupStatus::Disabled,
        _ => ActionGroupStatus::Enabled,
    }
}

impl From<WireAgent> for AgentRecord {
    fn from(agent: WireAgent) -> Self {
        AgentRecord {
            id: agent.agent_id,
            arn: agent.agent_arn,
            name: agent.agent_name,
            instruction: agent.instruction.unwrap_or_default(),
            foundation_model: agent.foundation_model.unwrap_or_default(),
            role_arn: agent.agent_resource_role_arn.unwrap_or_default(),
            description: agent.description,
            idle_session_ttl_secs: agent.idle_session_ttl,
            status: agent.agent_status,
            version: agent.agent_version,
            failure_reasons: agent.failure_reasons,
        }
    }
}

impl From<WireActionGroup> for ActionGroupRecord {
    fn from(group: WireActionGroup) -> Self {
        ActionGroupRecord {
            status: action_group_status(
                group.action_group_status,
                group.action_group_state.as_deref(),
            ),
            id: group.action_group_id,
            agent_id: group.agent_id,
            name: group.action_group_name,
            executor: group.action_group_executor.and_then(|e| e.lambda),
            api_schema: group.api_schema.and_then(|s| s.s3),
            description: group.description,
        }
    }
}

impl HttpAgentApi {
    /// Create a client from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.agent_endpoint().trim_end_matches('/').to_string(),
            bearer_token: config.api.bearer_token.clone(),
            debug: config.logging.debug,
        })
    }

    /// Create a client with custom base URL
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let base_url: String = base_url.into();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: None,
            debug: false,
        })
    }

    /// Attach a bearer token to every request
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn agent_url(&self, agent_id: &str) -> String {
        format!("{}/agents/{}/", self.base_url, agent_id)
    }

    fn action_groups_url(&self, agent_id: &str, agent_version: &str) -> String {
        format!(
            "{}/agents/{}/agentversions/{}/actiongroups/",
            self.base_url, agent_id, agent_version
        )
    }

    fn action_group_url(&self, agent_id: &str, agent_version: &str, id: &str) -> String {
        format!("{}{}/", self.action_groups_url(agent_id, agent_version), id)
    }

    /// Debug print if enabled
    fn debug_print(&self, label: &str, content: &str) {
        if self.debug {
            match content.char_indices().nth(500) {
                Some((cut, _)) => tracing::debug!("{}: {}...", label, &content[..cut]),
                None => tracing::debug!("{}: {}", label, content),
            }
        }
    }

    /// Send a request and turn non-success statuses into typed errors
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let request = match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                AgentformError::ServiceFault(format!(
                    "Cannot connect to management API at {}",
                    self.base_url
                ))
            } else {
                AgentformError::from(e)
            }
        })?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::error_from(response).await)
        }
    }

    /// Send a request and decode its JSON body
    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        let text = response.text().await?;
        self.debug_print("Response", &text);
        Ok(serde_json::from_str(&text)?)
    }

    async fn error_from(response: Response) -> AgentformError {
        let status = response.status();
        let error_type = response
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<WireError>(&body)
            .ok()
            .and_then(|e| e.message)
            .unwrap_or(body);

        if error_type.starts_with("ThrottlingException") || status == StatusCode::TOO_MANY_REQUESTS
        {
            return AgentformError::Throttled(message);
        }

        match status {
            StatusCode::NOT_FOUND => AgentformError::NotFound(message),
            StatusCode::CONFLICT => AgentformError::Conflict(message),
            s if s.is_server_error() => AgentformError::ServiceFault(message),
            s => AgentformError::Rejected {
                status: s.as_u16(),
                message,
            },
        }
    }

    fn agent_request<'a>(
        desired: &'a AgentDesiredState,
        client_token: Option<&'a str>,
    ) -> AgentRequest<'a> {
        AgentRequest {
            agent_name: &desired.name,
            agent_resource_role_arn: &desired.role_arn,
            foundation_model: &desired.foundation_model,
            idle_session_ttl: desired.idle_session_ttl_secs,
            instruction: &desired.instruction,
            description: desired.description.as_deref(),
            client_token,
        }
    }

    fn action_group_request(spec: &ActionGroupSpec, client_token: Option<String>) -> ActionGroupRequest<'_> {
        ActionGroupRequest {
            action_group_name: &spec.name,
            action_group_executor: spec.executor.as_ref().map(|lambda| WireExecutor {
                lambda: Some(lambda.clone()),
            }),
            api_schema: spec.api_schema.as_ref().map(|s3| WireApiSchema {
                s3: Some(s3.clone()),
            }),
            description: spec.description.as_deref(),
            action_group_state: "ENABLED",
            client_token,
        }
    }
}

#[async_trait]
impl AgentApi for HttpAgentApi {
    async fn create_agent(
        &self,
        desired: &AgentDesiredState,
        client_token: &str,
    ) -> Result<AgentRecord> {
        let body = Self::agent_request(desired, Some(client_token));
        self.debug_print("Create agent", &serde_json::to_string(&body)?);

        let envelope: AgentEnvelope = self
            .send_json(self.client.put(format!("{}/agents/", self.base_url)).json(&body))
            .await?;
        Ok(envelope.agent.into())
    }

    async fn update_agent(
        &self,
        agent_id: &str,
        desired: &AgentDesiredState,
    ) -> Result<AgentRecord> {
        let body = Self::agent_request(desired, None);
        self.debug_print("Update agent", &serde_json::to_string(&body)?);

        let envelope: AgentEnvelope = self
            .send_json(self.client.put(self.agent_url(agent_id)).json(&body))
            .await?;
        Ok(envelope.agent.into())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<AgentRecord> {
        let envelope: AgentEnvelope = self
            .send_json(self.client.get(self.agent_url(agent_id)))
            .await?;
        Ok(envelope.agent.into())
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<()> {
        let request = self
            .client
            .delete(self.agent_url(agent_id))
            .query(&[("skipResourceInUseCheck", "true")]);

        match self.send(request).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::debug!(agent_id, "agent already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn prepare_agent(&self, agent_id: &str) -> Result<()> {
        self.send(self.client.post(self.agent_url(agent_id))).await?;
        Ok(())
    }

    async fn find_agent_by_name(&self, name: &str) -> Result<Option<AgentSummary>> {
        let mut next_token: Option<String> = None;

        loop {
            let body = ListRequest {
                max_results: LIST_PAGE_SIZE,
                next_token: next_token.as_deref(),
            };
            let page: ListAgentsResponse = self
                .send_json(self.client.post(format!("{}/agents/", self.base_url)).json(&body))
                .await?;

            if let Some(found) = page.agent_summaries.into_iter().find(|a| a.agent_name == name) {
                return Ok(Some(AgentSummary {
                    id: found.agent_id,
                    name: found.agent_name,
                    status: found.agent_status,
                }));
            }

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => return Ok(None),
            }
        }
    }

    async fn create_action_group(
        &self,
        agent_id: &str,
        agent_version: &str,
        spec: &ActionGroupSpec,
    ) -> Result<ActionGroupRecord> {
        let body = Self::action_group_request(spec, Some(uuid::Uuid::new_v4().to_string()));
        self.debug_print("Create action group", &serde_json::to_string(&body)?);

        let envelope: ActionGroupEnvelope = self
            .send_json(
                self.client
                    .put(self.action_groups_url(agent_id, agent_version))
                    .json(&body),
            )
            .await?;
        Ok(envelope.agent_action_group.into())
    }

    async fn update_action_group(
        &self,
        agent_id: &str,
        agent_version: &str,
        action_group_id: &str,
        spec: &ActionGroupSpec,
    ) -> Result<ActionGroupRecord> {
        let body = Self::action_group_request(spec, None);
        self.debug_print("Update action group", &serde_json::to_string(&body)?);

        let envelope: ActionGroupEnvelope = self
            .send_json(
                self.client
                    .put(self.action_group_url(agent_id, agent_version, action_group_id))
                    .json(&body),
            )
            .await?;
        Ok(envelope.agent_action_group.into())
    }

    async fn get_action_group(
        &self,
        agent_id: &str,
        agent_version: &str,
        action_group_id: &str,
    ) -> Result<ActionGroupRecord> {
        let envelope: ActionGroupEnvelope = self
            .send_json(
                self.client
                    .get(self.action_group_url(agent_id, agent_version, action_group_id)),
            )
            .await?;
        Ok(envelope.agent_action_group.into())
    }

    async fn delete_action_group(
        &self,
        agent_id: &str,
        agent_version: &str,
        action_group_id: &str,
    ) -> Result<()> {
        let request = self
            .client
            .delete(self.action_group_url(agent_id, agent_version, action_group_id))
            .query(&[("skipResourceInUseCheck", "true")]);

        match self.send(request).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::debug!(agent_id, action_group_id, "action group already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn list_action_groups(
        &self,
        agent_id: &str,
        agent_version: &str,
    ) -> Result<Vec<ActionGroupSummary>> {
        let mut summaries = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let body = ListRequest {
                max_results: LIST_PAGE_SIZE,
                next_token: next_token.as_deref(),
            };
            let page: ListActionGroupsResponse = self
                .send_json(
                    self.client
                        .post(self.action_groups_url(agent_id, agent_version))
                        .json(&body),
                )
                .await?;

            summaries.extend(page.action_group_summaries.into_iter().map(|s| {
                ActionGroupSummary {
                    status: action_group_status(
                        s.action_group_status,
                        s.action_group_state.as_deref(),
                    ),
                    id: s.action_group_id,
                    name: s.action_group_name,
                }
            }));

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => return Ok(summaries),
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
