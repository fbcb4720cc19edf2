//! Event dispatcher
//!
//! Single entry point per invocation. Decodes the event, routes it to the
//! reconciler or the deletion handler under one deadline and turns every
//! result, including errors, into an [`Outcome`].

use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

use crate::controller::{Controller, Reconciled, StatusPoller};
use crate::core::{AgentDesiredState, AgentformError, Config, Result};
use crate::event::response::{AgentOutputs, Outcome};
use crate::event::types::{
    is_placeholder, placeholder_physical_id, raw_physical_id, LifecycleEvent, RequestType,
};

/// Routes lifecycle events to the controller
pub struct EventDispatcher {
    controller: Controller,
    budget: Duration,
}

impl EventDispatcher {
    /// Create a dispatcher that gives each invocation `budget` of working time
    pub fn new(controller: Controller, budget: Duration) -> Self {
        Self { controller, budget }
    }

    /// Create a dispatcher from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            Controller::from_config(config)?,
            config.working_budget(),
        ))
    }

    /// Get the controller
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Handle one raw event. Never fails; errors become failure outcomes.
    pub async fn handle(&self, raw: &Value) -> Outcome {
        match LifecycleEvent::from_value(raw) {
            Ok(event) => self.dispatch(&event).await,
            Err(e) => Self::reject(raw, e),
        }
    }

    /// Validate `config`, build a dispatcher from it and handle `raw`.
    /// Setup errors are reported against the event like any other failure.
    pub async fn invoke(config: &Config, raw: &Value) -> Outcome {
        match config.validate().and_then(|()| Self::from_config(config)) {
            Ok(dispatcher) => {
                tracing::debug!(backend = dispatcher.controller().api().name(), "dispatching event");
                dispatcher.handle(raw).await
            }
            Err(e) => Self::reject(raw, e),
        }
    }

    /// Failure outcome for an event that never reached a handler
    pub fn reject(raw: &Value, error: AgentformError) -> Outcome {
        tracing::error!(error = %error, "rejecting event");
        Outcome::failure(raw_physical_id(raw), error)
    }

    /// Handle a decoded event
    pub async fn dispatch(&self, event: &LifecycleEvent) -> Outcome {
        let poller = self.controller.poller(Instant::now() + self.budget);
        let span = tracing::info_span!(
            "lifecycle",
            request_type = %event.request_type,
            request_id = %event.request_id,
        );

        async {
            let outcome = match event.request_type {
                RequestType::Create => self.create(event, &poller).await,
                RequestType::Update => self.update(event, &poller).await,
                RequestType::Delete => self.delete(event, &poller).await,
            };
            match &outcome.reason {
                None => tracing::info!(physical_id = %outcome.physical_resource_id, "succeeded"),
                Some(reason) => tracing::error!(
                    physical_id = %outcome.physical_resource_id,
                    reason = %reason,
                    "failed"
                ),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn create(&self, event: &LifecycleEvent, poller: &StatusPoller) -> Outcome {
        let desired = match event.desired() {
            Ok(desired) => desired,
            Err(e) => return Outcome::failure(event.fallback_physical_id(), e),
        };

        let token = event.client_token(&desired.name);
        match self.controller.reconciler(poller).create(desired, &token).await {
            Ok(reconciled) => self.succeeded(reconciled, desired),
            Err(e) => {
                let physical_id = e
                    .agent_id()
                    .map(str::to_string)
                    .unwrap_or_else(|| placeholder_physical_id(&event.request_id));
                Outcome::failure(physical_id, e)
            }
        }
    }

    async fn update(&self, event: &LifecycleEvent, poller: &StatusPoller) -> Outcome {
        let desired = match event.desired() {
            Ok(desired) => desired,
            Err(e) => return Outcome::failure(event.fallback_physical_id(), e),
        };
        let physical_id = match event.physical_resource_id.as_deref() {
            Some(id) => id,
            None => {
                return Outcome::failure(
                    event.fallback_physical_id(),
                    AgentformError::invalid_event("Update without PhysicalResourceId"),
                )
            }
        };

        if let Some(old) = &event.old_properties {
            if old.name != desired.name {
                tracing::info!(from = %old.name, to = %desired.name, "agent renamed");
            }
        }

        let token = event.client_token(&desired.name);
        let reconciler = self.controller.reconciler(poller);
        if is_placeholder(physical_id) {
            // The earlier Create never produced an agent
            return match reconciler.create(desired, &token).await {
                Ok(reconciled) => self.succeeded(reconciled, desired),
                Err(e) => {
                    let id = e.agent_id().unwrap_or(physical_id).to_string();
                    Outcome::failure(id, e)
                }
            };
        }

        match reconciler.update(physical_id, desired, &token).await {
            Ok(reconciled) => self.succeeded(reconciled, desired),
            Err(e) => Outcome::failure(physical_id, e),
        }
    }

    async fn delete(&self, event: &LifecycleEvent, poller: &StatusPoller) -> Outcome {
        let physical_id = match event.physical_resource_id.as_deref() {
            Some(id) if !is_placeholder(id) => id,
            _ => {
                tracing::info!("nothing was provisioned, skipping delete");
                return Outcome::success(event.fallback_physical_id(), None);
            }
        };

        match self.controller.deletion(poller).delete(physical_id).await {
            Ok(()) => Outcome::success(physical_id, None),
            Err(e) => Outcome::failure(physical_id, e),
        }
    }

    fn succeeded(&self, reconciled: Reconciled, desired: &AgentDesiredState) -> Outcome {
        let outputs = AgentOutputs::from_agent(
            &reconciled.agent,
            self.controller.agent_version(),
            desired.action_groups.len(),
        );
        Outcome::success(reconciled.agent.id, Some(outputs))
    }
}
