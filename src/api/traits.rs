//! Management API trait for abstracting different backends
//!
//! Enables swapping between the remote REST API and the in-process simulation.

use async_trait::async_trait;

use crate::core::{
    ActionGroupRecord, ActionGroupSpec, ActionGroupSummary, AgentDesiredState, AgentRecord,
    AgentSummary, Result,
};

/// Trait for agent management backends.
///
/// Every call may fail with `Throttled`, `NotFound`, `Conflict` or
/// `ServiceFault`. The two delete operations report success when the
/// resource is already absent.
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// Create an agent. `client_token` makes retried deliveries idempotent.
    async fn create_agent(
        &self,
        desired: &AgentDesiredState,
        client_token: &str,
    ) -> Result<AgentRecord>;

    /// Overwrite the descriptive fields of an agent
    async fn update_agent(&self, agent_id: &str, desired: &AgentDesiredState)
        -> Result<AgentRecord>;

    /// Fetch an agent
    async fn get_agent(&self, agent_id: &str) -> Result<AgentRecord>;

    /// Delete an agent
    async fn delete_agent(&self, agent_id: &str) -> Result<()>;

    /// Compile the agent into a servable version
    async fn prepare_agent(&self, agent_id: &str) -> Result<()>;

    /// Look an agent up by its unique name
    async fn find_agent_by_name(&self, name: &str) -> Result<Option<AgentSummary>>;

    /// Create an action group under an agent version
    async fn create_action_group(
        &self,
        agent_id: &str,
        agent_version: &str,
        spec: &ActionGroupSpec,
    ) -> Result<ActionGroupRecord>;

    /// Overwrite an existing action group
    async fn update_action_group(
        &self,
        agent_id: &str,
        agent_version: &str,
        action_group_id: &str,
        spec: &ActionGroupSpec,
    ) -> Result<ActionGroupRecord>;

    /// Fetch an action group
    async fn get_action_group(
        &self,
        agent_id: &str,
        agent_version: &str,
        action_group_id: &str,
    ) -> Result<ActionGroupRecord>;

    /// Delete an action group
    async fn delete_action_group(
        &self,
        agent_id: &str,
        agent_version: &str,
        action_group_id: &str,
    ) -> Result<()>;

    /// List the action groups of an agent version
    async fn list_action_groups(
        &self,
        agent_id: &str,
        agent_version: &str,
    ) -> Result<Vec<ActionGroupSummary>>;

    /// Get the backend name
    fn name(&self) -> &str;
}
