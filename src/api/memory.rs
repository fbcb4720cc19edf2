//! In-process management API
//!
//! Simulates the asynchronous behavior of the remote service: mutations put a
//! resource into a transient status that settles after a configurable number
//! of reads. Every call is recorded, and faults can be queued per operation.
//! Used for local dry runs and throughout the test suite.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::api::traits::AgentApi;
use crate::core::{
    ActionGroupRecord, ActionGroupSpec, ActionGroupStatus, ActionGroupSummary, AgentDesiredState,
    AgentRecord, AgentStatus, AgentSummary, AgentformError, Result,
};

/// A recorded API call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    CreateAgent { name: String },
    UpdateAgent { agent_id: String },
    GetAgent { agent_id: String },
    DeleteAgent { agent_id: String },
    PrepareAgent { agent_id: String },
    FindAgent { name: String },
    CreateActionGroup { agent_id: String, name: String },
    UpdateActionGroup { agent_id: String, name: String },
    GetActionGroup { agent_id: String, action_group_id: String },
    DeleteActionGroup { agent_id: String, action_group_id: String },
    ListActionGroups { agent_id: String },
}

impl ApiCall {
    /// Whether the call changes remote state
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateAgent { .. }
                | Self::UpdateAgent { .. }
                | Self::DeleteAgent { .. }
                | Self::PrepareAgent { .. }
                | Self::CreateActionGroup { .. }
                | Self::UpdateActionGroup { .. }
                | Self::DeleteActionGroup { .. }
        )
    }

    /// Whether the call mutates an action group
    pub fn is_action_group_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateActionGroup { .. }
                | Self::UpdateActionGroup { .. }
                | Self::DeleteActionGroup { .. }
        )
    }

    fn operation(&self) -> Operation {
        match self {
            Self::CreateAgent { .. } => Operation::CreateAgent,
            Self::UpdateAgent { .. } => Operation::UpdateAgent,
            Self::GetAgent { .. } => Operation::GetAgent,
            Self::DeleteAgent { .. } => Operation::DeleteAgent,
            Self::PrepareAgent { .. } => Operation::PrepareAgent,
            Self::FindAgent { .. } => Operation::FindAgent,
            Self::CreateActionGroup { .. } => Operation::CreateActionGroup,
            Self::UpdateActionGroup { .. } => Operation::UpdateActionGroup,
            Self::GetActionGroup { .. } => Operation::GetActionGroup,
            Self::DeleteActionGroup { .. } => Operation::DeleteActionGroup,
            Self::ListActionGroups { .. } => Operation::ListActionGroups,
        }
    }
}

/// Operation key for fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateAgent,
    UpdateAgent,
    GetAgent,
    DeleteAgent,
    PrepareAgent,
    FindAgent,
    CreateActionGroup,
    UpdateActionGroup,
    GetActionGroup,
    DeleteActionGroup,
    ListActionGroups,
}

/// Status change that completes after `reads` more reads
#[derive(Debug, Clone, Copy)]
struct Transition<S> {
    target: S,
    reads: u32,
}

struct StoredAgent {
    record: AgentRecord,
    client_token: String,
    pending: Option<Transition<AgentStatus>>,
}

struct StoredActionGroup {
    record: ActionGroupRecord,
    version: String,
    pending: Option<Transition<ActionGroupStatus>>,
}

#[derive(Default)]
struct State {
    agents: BTreeMap<String, StoredAgent>,
    action_groups: BTreeMap<String, StoredActionGroup>,
    next_id: u64,
    calls: Vec<ApiCall>,
    faults: HashMap<Operation, VecDeque<AgentformError>>,
    fail_prepare: bool,
    fail_update: bool,
    failing_action_groups: HashSet<String>,
}

impl State {
    fn next_id(&mut self, prefix: char) -> String {
        self.next_id += 1;
        format!("{}{:09}", prefix, self.next_id)
    }

    /// Record the call, then surface a queued fault for it if any
    fn enter(&mut self, call: ApiCall) -> Result<()> {
        let operation = call.operation();
        self.calls.push(call);
        match self.faults.get_mut(&operation).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn agent_mut(&mut self, agent_id: &str) -> Result<&mut StoredAgent> {
        self.agents
            .get_mut(agent_id)
            .ok_or_else(|| AgentformError::not_found(format!("agent {}", agent_id)))
    }

    fn ensure_agent_stable(&mut self, agent_id: &str) -> Result<()> {
        let agent = self.agent_mut(agent_id)?;
        if agent.record.status.is_transient() {
            return Err(AgentformError::conflict(format!(
                "agent {} is {}",
                agent_id, agent.record.status
            )));
        }
        Ok(())
    }

    /// Changes to a prepared agent make it unprepared again
    fn mark_unprepared(&mut self, agent_id: &str) {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            if agent.record.status == AgentStatus::Prepared {
                agent.record.status = AgentStatus::NotPrepared;
            }
        }
    }

    fn remove_agent_groups(&mut self, agent_id: &str) {
        self.action_groups.retain(|_, g| g.record.agent_id != agent_id);
    }

    fn visible_groups(&self, agent_id: &str, version: &str) -> Vec<&StoredActionGroup> {
        self.action_groups
            .values()
            .filter(|g| g.record.agent_id == agent_id && g.version == version)
            .collect()
    }

    fn group_mut(
        &mut self,
        agent_id: &str,
        version: &str,
        action_group_id: &str,
    ) -> Result<&mut StoredActionGroup> {
        self.action_groups
            .get_mut(action_group_id)
            .filter(|g| g.record.agent_id == agent_id && g.version == version)
            .ok_or_else(|| {
                AgentformError::not_found(format!("action group {}", action_group_id))
            })
    }
}

/// In-process implementation of [`AgentApi`]
pub struct InMemoryAgentApi {
    state: Mutex<State>,
    settle_after: u32,
    region: String,
}

impl InMemoryAgentApi {
    /// Create an empty backend whose transitions settle on the first read
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            settle_after: 1,
            region: "us-east-1".to_string(),
        }
    }

    /// Number of reads a transient status survives
    pub fn with_settle_after(mut self, reads: u32) -> Self {
        self.settle_after = reads.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition<S>(&self, target: S) -> Option<Transition<S>> {
        Some(Transition {
            target,
            reads: self.settle_after,
        })
    }

    /// Queue an error returned by the next call of `operation`
    pub fn fail_next(&self, operation: Operation, error: AgentformError) {
        self.state()
            .faults
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Make every subsequent prepare end in `FAILED`
    pub fn fail_prepare(&self, fail: bool) {
        self.state().fail_prepare = fail;
    }

    /// Make every subsequent agent update end in `FAILED`
    pub fn fail_update(&self, fail: bool) {
        self.state().fail_update = fail;
    }

    /// Make creates/updates of the named action group end in `FAILED`
    pub fn fail_action_group(&self, name: impl Into<String>) {
        self.state().failing_action_groups.insert(name.into());
    }

    /// All calls so far, in order
    pub fn calls(&self) -> Vec<ApiCall> {
        self.state().calls.clone()
    }

    /// Mutating calls so far, in order
    pub fn mutations(&self) -> Vec<ApiCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    /// Forget the call log
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Number of agents that still exist
    pub fn agent_count(&self) -> usize {
        self.state().agents.len()
    }

    /// Snapshot of an agent without advancing its status
    pub fn agent(&self, agent_id: &str) -> Option<AgentRecord> {
        self.state().agents.get(agent_id).map(|a| a.record.clone())
    }

    /// Snapshot of an agent's action groups, ordered by name
    pub fn action_groups(&self, agent_id: &str) -> Vec<ActionGroupRecord> {
        let mut groups: Vec<ActionGroupRecord> = self
            .state()
            .action_groups
            .values()
            .filter(|g| g.record.agent_id == agent_id)
            .map(|g| g.record.clone())
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        groups
    }

    /// Drop an agent and its action groups out of band
    pub fn remove_agent(&self, agent_id: &str) {
        let mut state = self.state();
        state.agents.remove(agent_id);
        state.remove_agent_groups(agent_id);
    }

    fn store_group(
        &self,
        record: &mut ActionGroupRecord,
        spec: &ActionGroupSpec,
        failing: &HashSet<String>,
    ) -> Transition<ActionGroupStatus> {
        record.executor = spec.executor.clone();
        record.api_schema = spec.api_schema.clone();
        record.description = spec.description.clone();
        let target = if failing.contains(&spec.name) {
            ActionGroupStatus::Failed
        } else {
            ActionGroupStatus::Enabled
        };
        Transition {
            target,
            reads: self.settle_after,
        }
    }
}

impl Default for InMemoryAgentApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentApi for InMemoryAgentApi {
    async fn create_agent(
        &self,
        desired: &AgentDesiredState,
        client_token: &str,
    ) -> Result<AgentRecord> {
        let mut state = self.state();
        state.enter(ApiCall::CreateAgent {
            name: desired.name.clone(),
        })?;

        if let Some(existing) = state.agents.values().find(|a| a.record.name == desired.name) {
            if existing.client_token == client_token {
                return Ok(existing.record.clone());
            }
            return Err(AgentformError::conflict(format!(
                "agent named {} already exists",
                desired.name
            )));
        }

        let id = state.next_id('A');
        let record = AgentRecord {
            arn: format!("arn:aws:bedrock:{}:000000000000:agent/{}", self.region, id),
            id: id.clone(),
            name: desired.name.clone(),
            instruction: desired.instruction.clone(),
            foundation_model: desired.foundation_model.clone(),
            role_arn: desired.role_arn.clone(),
            description: desired.description.clone(),
            idle_session_ttl_secs: desired.idle_session_ttl_secs,
            status: AgentStatus::Creating,
            version: Some("DRAFT".to_string()),
            failure_reasons: Vec::new(),
        };
        state.agents.insert(
            id,
            StoredAgent {
                record: record.clone(),
                client_token: client_token.to_string(),
                pending: self.transition(AgentStatus::NotPrepared),
            },
        );
        Ok(record)
    }

    async fn update_agent(
        &self,
        agent_id: &str,
        desired: &AgentDesiredState,
    ) -> Result<AgentRecord> {
        let mut state = self.state();
        state.enter(ApiCall::UpdateAgent {
            agent_id: agent_id.to_string(),
        })?;
        state.ensure_agent_stable(agent_id)?;

        let target = if state.fail_update {
            AgentStatus::Failed
        } else {
            AgentStatus::NotPrepared
        };
        let pending = self.transition(target);
        let agent = state.agent_mut(agent_id)?;
        agent.record.name = desired.name.clone();
        agent.record.instruction = desired.instruction.clone();
        agent.record.foundation_model = desired.foundation_model.clone();
        agent.record.role_arn = desired.role_arn.clone();
        agent.record.description = desired.description.clone();
        agent.record.idle_session_ttl_secs = desired.idle_session_ttl_secs;
        agent.record.status = AgentStatus::Updating;
        agent.pending = pending;
        Ok(agent.record.clone())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<AgentRecord> {
        let mut state = self.state();
        state.enter(ApiCall::GetAgent {
            agent_id: agent_id.to_string(),
        })?;

        let agent = state.agent_mut(agent_id)?;
        if let Some(mut transition) = agent.pending.take() {
            transition.reads -= 1;
            if transition.reads == 0 {
                agent.record.status = transition.target;
            } else {
                agent.pending = Some(transition);
            }
        }

        if agent.record.status == AgentStatus::Deleted {
            state.remove_agent_groups(agent_id);
            state.agents.remove(agent_id);
            return Err(AgentformError::not_found(format!("agent {}", agent_id)));
        }
        Ok(agent.record.clone())
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<()> {
        let mut state = self.state();
        state.enter(ApiCall::DeleteAgent {
            agent_id: agent_id.to_string(),
        })?;

        if !state.agents.contains_key(agent_id) {
            return Ok(());
        }
        let remaining = state
            .action_groups
            .values()
            .filter(|g| g.record.agent_id == agent_id)
            .count();
        if remaining > 0 {
            return Err(AgentformError::conflict(format!(
                "agent {} still has {} action group(s)",
                agent_id, remaining
            )));
        }

        let pending = self.transition(AgentStatus::Deleted);
        let agent = state.agent_mut(agent_id)?;
        agent.record.status = AgentStatus::Deleting;
        agent.pending = pending;
        Ok(())
    }

    async fn prepare_agent(&self, agent_id: &str) -> Result<()> {
        let mut state = self.state();
        state.enter(ApiCall::PrepareAgent {
            agent_id: agent_id.to_string(),
        })?;
        state.ensure_agent_stable(agent_id)?;

        let target = if state.fail_prepare {
            AgentStatus::Failed
        } else {
            AgentStatus::Prepared
        };
        let pending = self.transition(target);
        let agent = state.agent_mut(agent_id)?;
        agent.record.status = AgentStatus::Preparing;
        agent.pending = pending;
        Ok(())
    }

    async fn find_agent_by_name(&self, name: &str) -> Result<Option<AgentSummary>> {
        let mut state = self.state();
        state.enter(ApiCall::FindAgent {
            name: name.to_string(),
        })?;

        Ok(state
            .agents
            .values()
            .find(|a| a.record.name == name)
            .map(|a| AgentSummary {
                id: a.record.id.clone(),
                name: a.record.name.clone(),
                status: a.record.status,
            }))
    }

    async fn create_action_group(
        &self,
        agent_id: &str,
        agent_version: &str,
        spec: &ActionGroupSpec,
    ) -> Result<ActionGroupRecord> {
        let mut state = self.state();
        state.enter(ApiCall::CreateActionGroup {
            agent_id: agent_id.to_string(),
            name: spec.name.clone(),
        })?;
        state.ensure_agent_stable(agent_id)?;

        if state
            .visible_groups(agent_id, agent_version)
            .iter()
            .any(|g| g.record.name == spec.name)
        {
            return Err(AgentformError::conflict(format!(
                "action group named {} already exists",
                spec.name
            )));
        }

        let id = state.next_id('G');
        let mut record = ActionGroupRecord {
            id: id.clone(),
            agent_id: agent_id.to_string(),
            name: spec.name.clone(),
            executor: None,
            api_schema: None,
            description: None,
            status: ActionGroupStatus::Creating,
        };
        let pending = self.store_group(&mut record, spec, &state.failing_action_groups);
        state.action_groups.insert(
            id,
            StoredActionGroup {
                record: record.clone(),
                version: agent_version.to_string(),
                pending: Some(pending),
            },
        );
        state.mark_unprepared(agent_id);
        Ok(record)
    }

    async fn update_action_group(
        &self,
        agent_id: &str,
        agent_version: &str,
        action_group_id: &str,
        spec: &ActionGroupSpec,
    ) -> Result<ActionGroupRecord> {
        let mut state = self.state();
        state.enter(ApiCall::UpdateActionGroup {
            agent_id: agent_id.to_string(),
            name: spec.name.clone(),
        })?;
        state.ensure_agent_stable(agent_id)?;

        let failing = state.failing_action_groups.clone();
        let group = state.group_mut(agent_id, agent_version, action_group_id)?;
        let mut record = group.record.clone();
        let pending = self.store_group(&mut record, spec, &failing);
        record.name = spec.name.clone();
        record.status = ActionGroupStatus::Updating;
        group.record = record.clone();
        group.pending = Some(pending);
        state.mark_unprepared(agent_id);
        Ok(record)
    }

    async fn get_action_group(
        &self,
        agent_id: &str,
        agent_version: &str,
        action_group_id: &str,
    ) -> Result<ActionGroupRecord> {
        let mut state = self.state();
        state.enter(ApiCall::GetActionGroup {
            agent_id: agent_id.to_string(),
            action_group_id: action_group_id.to_string(),
        })?;

        let group = state.group_mut(agent_id, agent_version, action_group_id)?;
        if let Some(mut transition) = group.pending.take() {
            transition.reads -= 1;
            if transition.reads == 0 {
                group.record.status = transition.target;
            } else {
                group.pending = Some(transition);
            }
        }

        if group.record.status == ActionGroupStatus::Deleted {
            state.action_groups.remove(action_group_id);
            return Err(AgentformError::not_found(format!(
                "action group {}",
                action_group_id
            )));
        }
        Ok(group.record.clone())
    }

    async fn delete_action_group(
        &self,
        agent_id: &str,
        agent_version: &str,
        action_group_id: &str,
    ) -> Result<()> {
        let mut state = self.state();
        state.enter(ApiCall::DeleteActionGroup {
            agent_id: agent_id.to_string(),
            action_group_id: action_group_id.to_string(),
        })?;

        if state
            .group_mut(agent_id, agent_version, action_group_id)
            .is_err()
        {
            return Ok(());
        }
        state.ensure_agent_stable(agent_id)?;

        let pending = self.transition(ActionGroupStatus::Deleted);
        let group = state.group_mut(agent_id, agent_version, action_group_id)?;
        group.record.status = ActionGroupStatus::Deleting;
        group.pending = pending;
        state.mark_unprepared(agent_id);
        Ok(())
    }

    async fn list_action_groups(
        &self,
        agent_id: &str,
        agent_version: &str,
    ) -> Result<Vec<ActionGroupSummary>> {
        let mut state = self.state();
        state.enter(ApiCall::ListActionGroups {
            agent_id: agent_id.to_string(),
        })?;
        state.agent_mut(agent_id)?;

        Ok(state
            .visible_groups(agent_id, agent_version)
            .into_iter()
            .map(|g| ActionGroupSummary {
                id: g.record.id.clone(),
                name: g.record.name.clone(),
                status: g.record.status,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
