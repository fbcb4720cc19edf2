//! Action group synchronization
//!
//! Brings the action groups of one agent version in line with the desired
//! list: a pure [`SyncPlan`] keyed by name, then [`ActionGroupSynchronizer`]
//! applies it one mutation at a time, waiting for each to stabilize.

use std::collections::BTreeMap;

use crate::api::{AgentApi, ExecutorPermissions};
use crate::controller::poller::StatusPoller;
use crate::controller::stabilize::Stabilizer;
use crate::core::{
    ActionGroupRecord, ActionGroupSpec, ActionGroupStatus, AgentRecord, AgentformError, Result,
};

/// Mutations needed to turn `observed` into `desired`
#[derive(Debug, Default)]
pub struct SyncPlan<'a> {
    /// Desired groups with no observed counterpart, in desired order
    pub creates: Vec<&'a ActionGroupSpec>,
    /// Desired groups whose observed record differs or is not enabled
    pub updates: Vec<(&'a ActionGroupSpec, &'a ActionGroupRecord)>,
    /// Observed groups that are no longer desired
    pub deletes: Vec<&'a ActionGroupRecord>,
    pub unchanged: Vec<&'a ActionGroupRecord>,
}

impl<'a> SyncPlan<'a> {
    pub fn new(desired: &'a [ActionGroupSpec], observed: &'a [ActionGroupRecord]) -> Self {
        let by_name: BTreeMap<&str, &ActionGroupRecord> =
            observed.iter().map(|g| (g.name.as_str(), g)).collect();

        let mut plan = SyncPlan::default();
        for spec in desired {
            match by_name.get(spec.name.as_str()).copied() {
                None => plan.creates.push(spec),
                Some(record)
                    if spec.matches(record) && record.status == ActionGroupStatus::Enabled =>
                {
                    plan.unchanged.push(record)
                }
                Some(record) => plan.updates.push((spec, record)),
            }
        }

        plan.deletes = by_name
            .values()
            .filter(|record| !desired.iter().any(|spec| spec.name == record.name))
            .copied()
            .collect();
        plan
    }

    /// True when nothing needs to change
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Names touched by one synchronization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: usize,
}

/// Applies a [`SyncPlan`] against the management API
pub struct ActionGroupSynchronizer<'a> {
    api: &'a dyn AgentApi,
    permissions: &'a dyn ExecutorPermissions,
    stabilizer: Stabilizer<'a>,
    agent_version: &'a str,
}

impl<'a> ActionGroupSynchronizer<'a> {
    pub fn new(
        api: &'a dyn AgentApi,
        permissions: &'a dyn ExecutorPermissions,
        poller: &'a StatusPoller,
        agent_version: &'a str,
    ) -> Self {
        Self {
            api,
            permissions,
            stabilizer: Stabilizer::new(api, poller, agent_version),
            agent_version,
        }
    }

    /// Current action groups of the agent. Groups being deleted are waited
    /// out and left out; groups being created or updated are waited on.
    pub async fn observe(&self, agent_id: &str) -> Result<Vec<ActionGroupRecord>> {
        let summaries = self
            .api
            .list_action_groups(agent_id, self.agent_version)
            .await?;

        let mut observed = Vec::with_capacity(summaries.len());
        for summary in summaries {
            if summary.status == ActionGroupStatus::Deleting {
                tracing::debug!(action_group = %summary.name, "waiting out pending deletion");
                self.stabilizer
                    .action_group_gone(agent_id, &summary.id)
                    .await?;
                continue;
            }

            match self.stabilizer.action_group_idle(agent_id, &summary.id).await {
                Ok(record) => observed.push(record),
                Err(e) if e.is_not_found() => {
                    tracing::debug!(action_group = %summary.name, "vanished while observing");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(observed)
    }

    /// Make the agent's action groups equal `desired`. The agent must be stable.
    ///
    /// Deletes run first, then updates, then creates. The first failure aborts
    /// the run as `PartialApplyFailure`; applied changes are kept.
    pub async fn apply(
        &self,
        agent: &AgentRecord,
        desired: &[ActionGroupSpec],
    ) -> Result<SyncReport> {
        let observed = self.observe(&agent.id).await?;
        let plan = SyncPlan::new(desired, &observed);
        tracing::info!(
            agent_id = %agent.id,
            creates = plan.creates.len(),
            updates = plan.updates.len(),
            deletes = plan.deletes.len(),
            unchanged = plan.unchanged.len(),
            "synchronizing action groups"
        );

        let mut report = SyncReport {
            unchanged: plan.unchanged.len(),
            ..SyncReport::default()
        };

        for record in &plan.deletes {
            self.delete(&agent.id, record)
                .await
                .map_err(|e| AgentformError::partial_apply(&record.name, e))?;
            report.deleted.push(record.name.clone());
        }

        for (spec, record) in &plan.updates {
            self.update(agent, spec, record)
                .await
                .map_err(|e| AgentformError::partial_apply(&spec.name, e))?;
            report.updated.push(spec.name.clone());
        }

        for spec in &plan.creates {
            self.create(agent, spec)
                .await
                .map_err(|e| AgentformError::partial_apply(&spec.name, e))?;
            report.created.push(spec.name.clone());
        }

        Ok(report)
    }

    async fn delete(&self, agent_id: &str, record: &ActionGroupRecord) -> Result<()> {
        self.api
            .delete_action_group(agent_id, self.agent_version, &record.id)
            .await?;
        self.stabilizer
            .action_group_gone(agent_id, &record.id)
            .await?;
        tracing::info!(agent_id, action_group = %record.name, "deleted action group");
        Ok(())
    }

    async fn update(
        &self,
        agent: &AgentRecord,
        spec: &ActionGroupSpec,
        record: &ActionGroupRecord,
    ) -> Result<()> {
        self.grant(agent, spec).await?;
        self.api
            .update_action_group(&agent.id, self.agent_version, &record.id, spec)
            .await?;
        self.stabilizer
            .action_group_enabled(&agent.id, &record.id)
            .await?;
        tracing::info!(agent_id = %agent.id, action_group = %spec.name, "updated action group");
        Ok(())
    }

    async fn create(&self, agent: &AgentRecord, spec: &ActionGroupSpec) -> Result<()> {
        self.grant(agent, spec).await?;
        let created = self
            .api
            .create_action_group(&agent.id, self.agent_version, spec)
            .await?;
        self.stabilizer
            .action_group_enabled(&agent.id, &created.id)
            .await?;
        tracing::info!(
            agent_id = %agent.id,
            action_group = %spec.name,
            action_group_id = %created.id,
            "created action group"
        );
        Ok(())
    }

    async fn grant(&self, agent: &AgentRecord, spec: &ActionGroupSpec) -> Result<()> {
        match &spec.executor {
            Some(executor) => {
                self.permissions
                    .grant_invoke(executor, &agent.name, &agent.arn)
                    .await
            }
            None => Ok(()),
        }
    }
}
