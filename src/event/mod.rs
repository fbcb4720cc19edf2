//! Event module - custom-resource protocol
//!
//! Lifecycle event decoding, dispatch and result reporting.

pub mod dispatcher;
pub mod response;
pub mod types;

pub use dispatcher::EventDispatcher;
pub use response::{AgentOutputs, Outcome, OutcomeStatus, ResponseDocument, ResponseSender};
pub use types::{LifecycleEvent, RequestType, ResourceProperties};
