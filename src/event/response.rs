//! Invocation results
//!
//! An [`Outcome`] is rendered two ways: the provider-style result printed by
//! the binary, and the custom-resource response document PUT to the
//! pre-signed `ResponseURL`.

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::core::{AgentRecord, AgentformError, Result};

/// Upper bound for a response document
pub const MAX_RESPONSE_BYTES: usize = 4096;

const TRUNCATION_MARKER: &str = "...";

/// Whether the invocation succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// Output attributes of a provisioned agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentOutputs {
    pub agent_id: String,
    pub agent_arn: String,
    pub agent_name: String,
    pub agent_status: String,
    pub agent_version: String,
    pub action_group_count: usize,
}

impl AgentOutputs {
    pub fn from_agent(agent: &AgentRecord, default_version: &str, action_group_count: usize) -> Self {
        Self {
            agent_id: agent.id.clone(),
            agent_arn: agent.arn.clone(),
            agent_name: agent.name.clone(),
            agent_status: agent.status.to_string(),
            agent_version: agent
                .version
                .clone()
                .unwrap_or_else(|| default_version.to_string()),
            action_group_count,
        }
    }
}

/// Result of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub physical_resource_id: String,
    /// Failure reason
    pub reason: Option<String>,
    pub data: Option<AgentOutputs>,
}

impl Outcome {
    pub fn success(physical_resource_id: impl Into<String>, data: Option<AgentOutputs>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            physical_resource_id: physical_resource_id.into(),
            reason: None,
            data,
        }
    }

    pub fn failure(physical_resource_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            physical_resource_id: physical_resource_id.into(),
            reason: Some(reason.to_string()),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    fn data_object(&self) -> Value {
        self.data
            .as_ref()
            .and_then(|d| serde_json::to_value(d).ok())
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    /// `{PhysicalResourceId, Data}` on success, `{Status, Reason, PhysicalResourceId}` on failure
    pub fn to_provider_json(&self) -> Value {
        match self.status {
            OutcomeStatus::Success => json!({
                "PhysicalResourceId": self.physical_resource_id,
                "Data": self.data_object(),
            }),
            OutcomeStatus::Failed => json!({
                "Status": self.status,
                "Reason": self.reason.clone().unwrap_or_default(),
                "PhysicalResourceId": self.physical_resource_id,
            }),
        }
    }

    /// Response document for the raw `event`, with the reason cut to fit the
    /// size limit. Works for events that failed to decode.
    pub fn response_document(&self, event: &Value) -> ResponseDocument {
        let field = |key: &str| {
            event
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let document = ResponseDocument {
            status: self.status,
            reason: self.reason.clone(),
            physical_resource_id: self.physical_resource_id.clone(),
            stack_id: field("StackId"),
            request_id: field("RequestId"),
            logical_resource_id: field("LogicalResourceId"),
            data: self.data_object(),
        };
        document.fit()
    }
}

/// Custom-resource response document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseDocument {
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    pub data: Value,
}

impl ResponseDocument {
    fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|b| b.len()).unwrap_or(0)
    }

    /// Shorten the reason until the encoded document is under the limit
    fn fit(mut self) -> Self {
        loop {
            let len = self.encoded_len();
            if len < MAX_RESPONSE_BYTES {
                return self;
            }
            let reason = match self.reason.as_mut() {
                Some(reason) if reason.len() > TRUNCATION_MARKER.len() => reason,
                _ => return self,
            };

            let overflow = len - MAX_RESPONSE_BYTES + 1 + TRUNCATION_MARKER.len();
            let mut keep = reason.len().saturating_sub(overflow);
            while !reason.is_char_boundary(keep) {
                keep -= 1;
            }
            reason.truncate(keep);
            reason.push_str(TRUNCATION_MARKER);
        }
    }
}

/// Delivers response documents to pre-signed URLs
#[derive(Clone)]
pub struct ResponseSender {
    client: Client,
}

impl ResponseSender {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    /// PUT the document. The pre-signed URL requires an empty content type.
    pub async fn send(&self, url: &str, document: &ResponseDocument) -> Result<()> {
        let body = serde_json::to_vec(document)?;
        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, "")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(status = ?document.status, "response delivered");
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(if status.is_server_error() {
            AgentformError::ServiceFault(message)
        } else {
            AgentformError::Rejected {
                status: status.as_u16(),
                message,
            }
        })
    }
}
