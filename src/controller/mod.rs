//! Controller module - agent lifecycle orchestration
//!
//! The status poller and the components built on it: action group
//! synchronization, agent reconciliation and deletion. [`Controller`] owns the
//! backend handles and hands out per-invocation components bound to one
//! deadline.

pub mod deletion;
pub mod poller;
pub mod reconciler;
pub mod stabilize;
pub mod sync;

use std::sync::Arc;
use tokio::time::Instant;

use crate::api::{create_api, create_permissions, AgentApi, ExecutorPermissions, NoopPermissions};
use crate::core::{Config, Result};

pub use deletion::DeletionHandler;
pub use poller::{PollPolicy, StatusPoller};
pub use reconciler::{AgentReconciler, Reconciled};
pub use stabilize::Stabilizer;
pub use sync::{ActionGroupSynchronizer, SyncPlan, SyncReport};

/// Default agent version action groups attach to
pub const DEFAULT_AGENT_VERSION: &str = "DRAFT";

/// Shared handles for lifecycle operations
#[derive(Clone)]
pub struct Controller {
    api: Arc<dyn AgentApi>,
    permissions: Arc<dyn ExecutorPermissions>,
    policy: PollPolicy,
    agent_version: String,
}

impl Controller {
    /// Create a controller over `api` with default polling and no permission grants
    pub fn new(api: Arc<dyn AgentApi>) -> Self {
        Self {
            api,
            permissions: Arc::new(NoopPermissions),
            policy: PollPolicy::default(),
            agent_version: DEFAULT_AGENT_VERSION.to_string(),
        }
    }

    /// Create a controller with backends chosen by configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(create_api(config)?)
            .with_permissions(create_permissions(config)?)
            .with_poll_policy(PollPolicy::from_config(&config.poll))
            .with_agent_version(config.controller.agent_version.clone()))
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn ExecutorPermissions>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_agent_version(mut self, version: impl Into<String>) -> Self {
        self.agent_version = version.into();
        self
    }

    /// Get the management API backend
    pub fn api(&self) -> &Arc<dyn AgentApi> {
        &self.api
    }

    /// Get the agent version action groups are managed under
    pub fn agent_version(&self) -> &str {
        &self.agent_version
    }

    /// Poller bound to `deadline`
    pub fn poller(&self, deadline: Instant) -> StatusPoller {
        StatusPoller::new(self.policy.clone(), deadline)
    }

    pub fn reconciler<'a>(&'a self, poller: &'a StatusPoller) -> AgentReconciler<'a> {
        AgentReconciler::new(
            self.api.as_ref(),
            self.permissions.as_ref(),
            poller,
            &self.agent_version,
        )
    }

    pub fn deletion<'a>(&'a self, poller: &'a StatusPoller) -> DeletionHandler<'a> {
        DeletionHandler::new(self.api.as_ref(), poller, &self.agent_version)
    }
}
