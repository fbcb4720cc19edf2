//! Custom error types for agentform
//!
//! Provides a unified error handling system across all modules.

use std::time::Duration;

use thiserror::Error;

/// Main error type for agentform operations
#[derive(Error, Debug)]
pub enum AgentformError {
    /// The management API rejected the call because of request rate
    #[error("Throttled: {0}")]
    Throttled(String),

    /// The addressed remote resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The call conflicts with existing remote state (e.g. a name collision)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The management API failed internally
    #[error("Service fault: {0}")]
    ServiceFault(String),

    /// Non-retryable client error (validation, access denied, quota)
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// A remote resource reached a failure status while we waited on it
    #[error("{resource} failed to stabilize, last status {status}")]
    StabilizationFailed { resource: String, status: String },

    /// The invocation deadline elapsed while waiting on a resource
    #[error("Timed out after {waited:?} waiting for {resource}")]
    Timeout { resource: String, waited: Duration },

    /// One action group operation failed mid-synchronization
    #[error("Action group '{action_group}' failed to apply: {source}")]
    PartialApplyFailure {
        action_group: String,
        #[source]
        source: Box<AgentformError>,
    },

    /// A step failed after the agent had already been created
    #[error("{source}")]
    Incomplete {
        agent_id: String,
        #[source]
        source: Box<AgentformError>,
    },

    /// Malformed or unsupported lifecycle event
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type for agentform operations
pub type Result<T> = std::result::Result<T, AgentformError>;

impl AgentformError {
    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an invalid event error
    pub fn invalid_event(msg: impl Into<String>) -> Self {
        Self::InvalidEvent(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Attribute a failure to a single action group
    pub fn partial_apply(action_group: impl Into<String>, source: AgentformError) -> Self {
        Self::PartialApplyFailure {
            action_group: action_group.into(),
            source: Box::new(source),
        }
    }

    /// Record that `agent_id` exists remotely even though the operation failed.
    /// Wrapping twice keeps the innermost id.
    pub fn incomplete(agent_id: impl Into<String>, source: AgentformError) -> Self {
        match source {
            Self::Incomplete { .. } => source,
            other => Self::Incomplete {
                agent_id: agent_id.into(),
                source: Box::new(other),
            },
        }
    }

    /// True for `NotFound`, looking through `Incomplete` wrappers
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Incomplete { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// True for `Conflict`
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether the failure is transient and a later attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Throttled(_) | Self::ServiceFault(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Identifier of an agent created before the failure, if any
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::Incomplete { agent_id, .. } => Some(agent_id),
            _ => None,
        }
    }
}
