//! Shared types used across agentform modules
//!
//! Desired state supplied by the caller and the remote records observed
//! through the management API.

use serde::{Deserialize, Serialize};

/// Object store location of an action group's OpenAPI document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Location {
    /// Bucket name
    #[serde(rename = "s3BucketName")]
    pub bucket: String,
    /// Object key
    #[serde(rename = "s3ObjectKey")]
    pub key: String,
}

impl S3Location {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// Desired configuration of one action group, keyed by name within its agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionGroupSpec {
    /// Unique name within the agent
    pub name: String,
    /// Callable ARN/URI that serves the action group, if any
    pub executor: Option<String>,
    /// Location of the OpenAPI document
    pub api_schema: Option<S3Location>,
    /// Optional description
    pub description: Option<String>,
}

impl ActionGroupSpec {
    /// Create a spec with only a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executor: None,
            api_schema: None,
            description: None,
        }
    }

    /// Set the executor reference
    pub fn with_executor(mut self, executor: impl Into<String>) -> Self {
        self.executor = Some(executor.into());
        self
    }

    /// Set the schema location
    pub fn with_schema(mut self, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        self.api_schema = Some(S3Location::new(bucket, key));
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether an observed record already matches this spec
    pub fn matches(&self, record: &ActionGroupRecord) -> bool {
        self.executor == record.executor
            && self.api_schema == record.api_schema
            && self.description == record.description
    }
}

/// Desired state of the agent for one invocation. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDesiredState {
    pub name: String,
    pub instruction: String,
    pub foundation_model: String,
    /// Execution role reference attached to the agent
    pub role_arn: String,
    pub description: Option<String>,
    pub idle_session_ttl_secs: u32,
    /// Ordered, unique by name
    pub action_groups: Vec<ActionGroupSpec>,
}

/// Agent status as reported by the management API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Creating,
    Preparing,
    Prepared,
    NotPrepared,
    Updating,
    Versioning,
    Failed,
    Deleting,
    /// Synthesized when the agent is no longer visible
    Deleted,
}

impl AgentStatus {
    /// A status in which the agent must not be mutated
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Creating | Self::Preparing | Self::Updating | Self::Versioning | Self::Deleting
        )
    }

    /// A status the agent cannot leave on its own
    pub fn is_failed(self) -> bool {
        self == Self::Failed
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Creating => "CREATING",
            AgentStatus::Preparing => "PREPARING",
            AgentStatus::Prepared => "PREPARED",
            AgentStatus::NotPrepared => "NOT_PREPARED",
            AgentStatus::Updating => "UPDATING",
            AgentStatus::Versioning => "VERSIONING",
            AgentStatus::Failed => "FAILED",
            AgentStatus::Deleting => "DELETING",
            AgentStatus::Deleted => "DELETED",
        };
        write!(f, "{}", s)
    }
}

/// Authoritative remote agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRecord {
    pub id: String,
    pub arn: String,
    pub name: String,
    pub instruction: String,
    pub foundation_model: String,
    pub role_arn: String,
    pub description: Option<String>,
    pub idle_session_ttl_secs: u32,
    pub status: AgentStatus,
    /// Version label, once known
    pub version: Option<String>,
    /// Reasons reported alongside a failed status
    pub failure_reasons: Vec<String>,
}

impl AgentRecord {
    /// Whether the descriptive fields already equal the desired state
    pub fn matches(&self, desired: &AgentDesiredState) -> bool {
        self.name == desired.name
            && self.instruction == desired.instruction
            && self.foundation_model == desired.foundation_model
            && self.role_arn == desired.role_arn
            && self.description == desired.description
            && self.idle_session_ttl_secs == desired.idle_session_ttl_secs
    }
}

/// Displays as the status, followed by failure reasons when present
impl std::fmt::Display for AgentRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.status)?;
        if !self.failure_reasons.is_empty() {
            write!(f, " ({})", self.failure_reasons.join("; "))?;
        }
        Ok(())
    }
}

/// Entry of the agent listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
}

/// Action group status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionGroupStatus {
    Creating,
    Updating,
    Enabled,
    Disabled,
    Failed,
    Deleting,
    Deleted,
}

impl ActionGroupStatus {
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Creating | Self::Updating | Self::Deleting)
    }
}

impl std::fmt::Display for ActionGroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionGroupStatus::Creating => "CREATING",
            ActionGroupStatus::Updating => "UPDATING",
            ActionGroupStatus::Enabled => "ENABLED",
            ActionGroupStatus::Disabled => "DISABLED",
            ActionGroupStatus::Failed => "FAILED",
            ActionGroupStatus::Deleting => "DELETING",
            ActionGroupStatus::Deleted => "DELETED",
        };
        write!(f, "{}", s)
    }
}

/// Remote action group attached to an agent version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionGroupRecord {
    pub id: String,
    pub agent_id: String,
    pub name: String,
    pub executor: Option<String>,
    pub api_schema: Option<S3Location>,
    pub description: Option<String>,
    pub status: ActionGroupStatus,
}

impl std::fmt::Display for ActionGroupRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.status)
    }
}

/// Entry of the action group listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionGroupSummary {
    pub id: String,
    pub name: String,
    pub status: ActionGroupStatus,
}
