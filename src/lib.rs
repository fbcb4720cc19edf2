//! Agentform - Agent Lifecycle Controller
//!
//! Provisions a hosted conversational agent and its action groups as a
//! custom resource. Each invocation receives one Create, Update or Delete
//! event, drives the remote management API to the desired state and reports
//! a physical id plus output attributes back to the provisioning framework.
//!
//! # Architecture
//!
//! - **Core**: Shared types, configuration, logging and error handling
//! - **API**: Management API abstraction with HTTP and in-memory backends
//! - **Controller**: Status polling, action group sync, reconciliation, deletion
//! - **Event**: Event decoding, dispatch and custom-resource responses
//!
//! # Usage
//!
//! ```rust,no_run
//! use agentform::{Config, EventDispatcher};
//!
//! #[tokio::main]
//! async fn main() -> agentform::Result<()> {
//!     let config = Config::load()?;
//!
//!     let event = serde_json::json!({
//!         "RequestType": "Delete",
//!         "RequestId": "example",
//!         "PhysicalResourceId": "AGENT12345",
//!     });
//!     let outcome = EventDispatcher::invoke(&config, &event).await;
//!     println!("{}", outcome.to_provider_json());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod controller;
pub mod core;
pub mod event;

// Re-export commonly used items
pub use api::{AgentApi, InMemoryAgentApi};
pub use controller::Controller;
pub use core::{AgentformError, Config, Result};
pub use event::{EventDispatcher, LifecycleEvent, Outcome};
