//! Deletion handler
//!
//! Tears an agent down in dependency order: every action group first, the
//! agent last. Anything already gone counts as deleted.

use crate::api::AgentApi;
use crate::controller::poller::StatusPoller;
use crate::controller::stabilize::Stabilizer;
use crate::core::{ActionGroupStatus, AgentformError, Result};

/// Deletes agents and their action groups
pub struct DeletionHandler<'a> {
    api: &'a dyn AgentApi,
    stabilizer: Stabilizer<'a>,
    agent_version: &'a str,
}

impl<'a> DeletionHandler<'a> {
    pub fn new(api: &'a dyn AgentApi, poller: &'a StatusPoller, agent_version: &'a str) -> Self {
        Self {
            api,
            stabilizer: Stabilizer::new(api, poller, agent_version),
            agent_version,
        }
    }

    /// Delete the agent and all of its action groups.
    ///
    /// The agent is only deleted once every action group is confirmed gone;
    /// any other failure while removing action groups aborts first.
    pub async fn delete(&self, agent_id: &str) -> Result<()> {
        match self.stabilizer.agent_idle(agent_id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                tracing::info!(agent_id, "agent already absent");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let groups = match self.api.list_action_groups(agent_id, self.agent_version).await {
            Ok(groups) => groups,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        for group in &groups {
            if group.status != ActionGroupStatus::Deleting {
                match self
                    .api
                    .delete_action_group(agent_id, self.agent_version, &group.id)
                    .await
                {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(AgentformError::partial_apply(&group.name, e)),
                }
            }
            self.stabilizer
                .action_group_gone(agent_id, &group.id)
                .await
                .map_err(|e| AgentformError::partial_apply(&group.name, e))?;
            tracing::info!(agent_id, action_group = %group.name, "deleted action group");
        }

        self.api.delete_agent(agent_id).await?;
        self.stabilizer.agent_gone(agent_id).await?;
        tracing::info!(agent_id, action_groups = groups.len(), "deleted agent");
        Ok(())
    }
}
