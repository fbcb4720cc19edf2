//! Agent reconciler
//!
//! Drives one agent from its observed state to the desired state: agent
//! fields first, then action groups, then a prepare. Nothing is kept between
//! invocations; the remote status is the only durable state.

use crate::api::{AgentApi, ExecutorPermissions};
use crate::controller::poller::StatusPoller;
use crate::controller::stabilize::Stabilizer;
use crate::controller::sync::{ActionGroupSynchronizer, SyncReport};
use crate::core::{AgentDesiredState, AgentRecord, AgentformError, Result};

/// Result of a successful create or update
#[derive(Debug, Clone)]
pub struct Reconciled {
    /// The prepared agent
    pub agent: AgentRecord,
    pub sync: SyncReport,
    /// Whether an existing agent with the same name was taken over on create
    pub adopted: bool,
}

/// Creates and updates agents
pub struct AgentReconciler<'a> {
    api: &'a dyn AgentApi,
    permissions: &'a dyn ExecutorPermissions,
    poller: &'a StatusPoller,
    agent_version: &'a str,
}

impl<'a> AgentReconciler<'a> {
    pub fn new(
        api: &'a dyn AgentApi,
        permissions: &'a dyn ExecutorPermissions,
        poller: &'a StatusPoller,
        agent_version: &'a str,
    ) -> Self {
        Self {
            api,
            permissions,
            poller,
            agent_version,
        }
    }

    fn stabilizer(&self) -> Stabilizer<'a> {
        Stabilizer::new(self.api, self.poller, self.agent_version)
    }

    /// Create the agent, synchronize its action groups and prepare it.
    ///
    /// A name collision adopts the existing agent and converges it through
    /// the update path. Failures after the agent exists carry its id.
    pub async fn create(
        &self,
        desired: &AgentDesiredState,
        client_token: &str,
    ) -> Result<Reconciled> {
        let created = match self.api.create_agent(desired, client_token).await {
            Ok(agent) => agent,
            Err(e) if e.is_conflict() => return self.adopt(desired, e).await,
            Err(e) => return Err(e),
        };
        tracing::info!(agent_id = %created.id, agent_name = %desired.name, "created agent");

        let result = async {
            let agent = self.stabilizer().agent_settled(&created.id).await?;
            self.converge(agent, desired).await
        }
        .await;
        result.map_err(|e| AgentformError::incomplete(&created.id, e))
    }

    /// Update an existing agent. Falls back to [`create`](Self::create) when
    /// the agent no longer exists.
    pub async fn update(
        &self,
        agent_id: &str,
        desired: &AgentDesiredState,
        client_token: &str,
    ) -> Result<Reconciled> {
        match self.update_existing(agent_id, desired).await? {
            Some(reconciled) => Ok(reconciled),
            None => {
                tracing::warn!(agent_id, "agent no longer exists, creating it again");
                self.create(desired, client_token).await
            }
        }
    }

    async fn adopt(&self, desired: &AgentDesiredState, conflict: AgentformError) -> Result<Reconciled> {
        let existing = match self.api.find_agent_by_name(&desired.name).await? {
            Some(existing) => existing,
            None => return Err(conflict),
        };
        tracing::info!(
            agent_id = %existing.id,
            agent_name = %desired.name,
            "agent name already taken, adopting existing agent"
        );

        match self.update_existing(&existing.id, desired).await {
            Ok(Some(mut reconciled)) => {
                reconciled.adopted = true;
                Ok(reconciled)
            }
            Ok(None) => Err(conflict),
            Err(e) => Err(AgentformError::incomplete(&existing.id, e)),
        }
    }

    /// `Ok(None)` when the agent does not exist
    async fn update_existing(
        &self,
        agent_id: &str,
        desired: &AgentDesiredState,
    ) -> Result<Option<Reconciled>> {
        let stabilizer = self.stabilizer();
        let current = match stabilizer.agent_idle(agent_id).await {
            Ok(agent) => agent,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let agent = if current.matches(desired) {
            tracing::debug!(agent_id, "agent fields unchanged");
            current
        } else {
            self.api.update_agent(agent_id, desired).await?;
            tracing::info!(agent_id, "updated agent");
            // FAILED is tolerated before the update, not after it
            stabilizer.agent_settled(agent_id).await?
        };

        self.converge(agent, desired).await.map(Some)
    }

    /// Synchronize action groups of a stable agent, then prepare it
    async fn converge(&self, agent: AgentRecord, desired: &AgentDesiredState) -> Result<Reconciled> {
        let sync = ActionGroupSynchronizer::new(
            self.api,
            self.permissions,
            self.poller,
            self.agent_version,
        )
        .apply(&agent, &desired.action_groups)
        .await?;

        self.api.prepare_agent(&agent.id).await?;
        let prepared = self.stabilizer().agent_prepared(&agent.id).await?;
        tracing::info!(
            agent_id = %prepared.id,
            status = %prepared.status,
            action_groups = desired.action_groups.len(),
            "agent prepared"
        );

        Ok(Reconciled {
            agent: prepared,
            sync,
            adopted: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiCall, InMemoryAgentApi, NoopPermissions};
    use crate::controller::poller::PollPolicy;
    use crate::core::{ActionGroupSpec, AgentStatus};
    use std::time::Duration;

    fn desired(groups: Vec<ActionGroupSpec>) -> AgentDesiredState {
        AgentDesiredState {
            name: "reconcile-test".to_string(),
            instruction: "answer questions".to_string(),
            foundation_model: "anthropic.claude-v2".to_string(),
            role_arn: "arn:aws:iam::123:role/agent".to_string(),
            description: None,
            idle_session_ttl_secs: 600,
            action_groups: groups,
        }
    }

    fn poller() -> StatusPoller {
        StatusPoller::with_budget(PollPolicy::default(), Duration::from_secs(300))
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_prepares_agent() {
        let api = InMemoryAgentApi::new().with_settle_after(2);
        let poller = poller();
        let reconciler = AgentReconciler::new(&api, &NoopPermissions, &poller, "DRAFT");

        let result = reconciler
            .create(&desired(vec![ActionGroupSpec::new("lookup")]), "tok")
            .await
            .unwrap();

        assert_eq!(result.agent.status, AgentStatus::Prepared);
        assert_eq!(result.sync.created, vec!["lookup".to_string()]);
        assert!(!result.adopted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_name_collision_adopts_existing_agent() {
        let api = InMemoryAgentApi::new();
        let poller = poller();
        let reconciler = AgentReconciler::new(&api, &NoopPermissions, &poller, "DRAFT");

        let first = reconciler.create(&desired(vec![]), "first").await.unwrap();
        let second = reconciler.create(&desired(vec![]), "second").await.unwrap();

        assert_eq!(first.agent.id, second.agent.id);
        assert!(second.adopted);
        assert_eq!(api.agent_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_of_missing_agent_recreates_it() {
        let api = InMemoryAgentApi::new();
        let poller = poller();
        let reconciler = AgentReconciler::new(&api, &NoopPermissions, &poller, "DRAFT");

        let result = reconciler
            .update("A000000099", &desired(vec![]), "tok")
            .await
            .unwrap();

        assert_ne!(result.agent.id, "A000000099");
        assert_eq!(api.agent_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_update_stops_before_action_groups() {
        let api = InMemoryAgentApi::new();
        let poller = poller();
        let reconciler = AgentReconciler::new(&api, &NoopPermissions, &poller, "DRAFT");
        let agent_id = reconciler.create(&desired(vec![]), "tok").await.unwrap().agent.id;

        api.fail_update(true);
        api.clear_calls();
        let mut changed = desired(vec![ActionGroupSpec::new("lookup")]);
        changed.instruction = "answer questions briefly".to_string();
        let err = reconciler.update(&agent_id, &changed, "tok").await.unwrap_err();

        assert!(matches!(
            err,
            AgentformError::StabilizationFailed { ref status, .. } if status.starts_with("FAILED")
        ));
        assert_eq!(
            api.mutations(),
            vec![ApiCall::UpdateAgent { agent_id: agent_id.clone() }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_agent_can_be_updated_again() {
        let api = InMemoryAgentApi::new();
        let poller = poller();
        let reconciler = AgentReconciler::new(&api, &NoopPermissions, &poller, "DRAFT");
        let agent_id = reconciler.create(&desired(vec![]), "tok").await.unwrap().agent.id;

        api.fail_update(true);
        let mut changed = desired(vec![]);
        changed.instruction = "answer questions briefly".to_string();
        assert!(reconciler.update(&agent_id, &changed, "tok").await.is_err());

        api.fail_update(false);
        changed.instruction = "answer questions in detail".to_string();
        let result = reconciler.update(&agent_id, &changed, "tok").await.unwrap();
        assert_eq!(result.agent.status, AgentStatus::Prepared);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_create_carries_agent_id() {
        let api = InMemoryAgentApi::new();
        api.fail_prepare(true);
        let poller = poller();
        let reconciler = AgentReconciler::new(&api, &NoopPermissions, &poller, "DRAFT");

        let err = reconciler.create(&desired(vec![]), "tok").await.unwrap_err();
        let agent_id = err.agent_id().unwrap().to_string();
        assert!(api.agent(&agent_id).is_some());
        assert!(api
            .mutations()
            .iter()
            .all(|c| !matches!(c, ApiCall::DeleteAgent { .. })));
    }
}
