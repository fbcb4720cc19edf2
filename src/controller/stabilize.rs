//! Resource-specific waits built on the status poller

use crate::api::AgentApi;
use crate::controller::poller::StatusPoller;
use crate::core::{ActionGroupRecord, ActionGroupStatus, AgentRecord, AgentStatus, Result};

/// Waits on agents and action groups of one agent version
pub struct Stabilizer<'a> {
    api: &'a dyn AgentApi,
    poller: &'a StatusPoller,
    agent_version: &'a str,
}

impl<'a> Stabilizer<'a> {
    pub fn new(api: &'a dyn AgentApi, poller: &'a StatusPoller, agent_version: &'a str) -> Self {
        Self {
            api,
            poller,
            agent_version,
        }
    }

    /// Wait until the agent leaves every transient status. `FAILED` is an error.
    pub async fn agent_settled(&self, agent_id: &str) -> Result<AgentRecord> {
        self.poller
            .wait_until(
                &format!("agent {}", agent_id),
                || self.api.get_agent(agent_id),
                |agent| !agent.status.is_transient(),
                |agent| agent.status.is_failed(),
            )
            .await
    }

    /// Wait until the agent leaves every transient status, accepting `FAILED`.
    /// A failed agent can still be updated, prepared again or deleted.
    pub async fn agent_idle(&self, agent_id: &str) -> Result<AgentRecord> {
        self.poller
            .wait_until(
                &format!("agent {}", agent_id),
                || self.api.get_agent(agent_id),
                |agent| !agent.status.is_transient(),
                |_| false,
            )
            .await
    }

    /// Wait for `PREPARED` after a prepare call
    pub async fn agent_prepared(&self, agent_id: &str) -> Result<AgentRecord> {
        // NOT_PREPARED right after the call means preparation has not started yet
        self.poller
            .wait_until(
                &format!("agent {} preparation", agent_id),
                || self.api.get_agent(agent_id),
                |agent| agent.status == AgentStatus::Prepared,
                |agent| agent.status.is_failed(),
            )
            .await
    }

    /// Wait until the agent is `DELETED` or no longer visible
    pub async fn agent_gone(&self, agent_id: &str) -> Result<AgentStatus> {
        let api = self.api;
        self.poller
            .wait_until(
                &format!("agent {} deletion", agent_id),
                move || async move {
                    match api.get_agent(agent_id).await {
                        Ok(agent) => Ok(agent.status),
                        Err(e) if e.is_not_found() => Ok(AgentStatus::Deleted),
                        Err(e) => Err(e),
                    }
                },
                |status| *status == AgentStatus::Deleted,
                |status| status.is_failed(),
            )
            .await
    }

    /// Wait for an action group to become `ENABLED`. `FAILED` and `DISABLED` are errors.
    pub async fn action_group_enabled(
        &self,
        agent_id: &str,
        action_group_id: &str,
    ) -> Result<ActionGroupRecord> {
        self.poller
            .wait_until(
                &format!("action group {}", action_group_id),
                || {
                    self.api
                        .get_action_group(agent_id, self.agent_version, action_group_id)
                },
                |group| group.status == ActionGroupStatus::Enabled,
                |group| {
                    matches!(
                        group.status,
                        ActionGroupStatus::Failed | ActionGroupStatus::Disabled
                    )
                },
            )
            .await
    }

    /// Wait for an action group to leave `CREATING`/`UPDATING`, whatever it settles to
    pub async fn action_group_idle(
        &self,
        agent_id: &str,
        action_group_id: &str,
    ) -> Result<ActionGroupRecord> {
        self.poller
            .wait_until(
                &format!("action group {}", action_group_id),
                || {
                    self.api
                        .get_action_group(agent_id, self.agent_version, action_group_id)
                },
                |group| !group.status.is_transient(),
                |_| false,
            )
            .await
    }

    /// Wait until an action group is `DELETED` or no longer visible
    pub async fn action_group_gone(
        &self,
        agent_id: &str,
        action_group_id: &str,
    ) -> Result<ActionGroupStatus> {
        let api = self.api;
        let version = self.agent_version;
        self.poller
            .wait_until(
                &format!("action group {} deletion", action_group_id),
                move || async move {
                    match api.get_action_group(agent_id, version, action_group_id).await {
                        Ok(group) => Ok(group.status),
                        Err(e) if e.is_not_found() => Ok(ActionGroupStatus::Deleted),
                        Err(e) => Err(e),
                    }
                },
                |status| *status == ActionGroupStatus::Deleted,
                |status| *status == ActionGroupStatus::Failed,
            )
            .await
    }
}
