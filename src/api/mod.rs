//! API module - agent management backends
//!
//! The `AgentApi` trait with its HTTP and in-process implementations, plus
//! executor permission grants. Factories pick implementations from config.

pub mod http;
pub mod memory;
pub mod permissions;
pub mod traits;

use std::sync::Arc;

use crate::core::config::{BackendType, Config};
use crate::core::Result;

pub use http::HttpAgentApi;
pub use memory::{ApiCall, InMemoryAgentApi, Operation};
pub use permissions::{ExecutorPermissions, LambdaPermissions, NoopPermissions};
pub use traits::AgentApi;

/// Create a management API backend based on configuration
pub fn create_api(config: &Config) -> Result<Arc<dyn AgentApi>> {
    let api: Arc<dyn AgentApi> = match config.api.backend {
        BackendType::Http => Arc::new(HttpAgentApi::from_config(config)?),
        BackendType::Memory => Arc::new(InMemoryAgentApi::new()),
    };
    Ok(api)
}

/// Create the executor permission granter based on configuration
pub fn create_permissions(config: &Config) -> Result<Arc<dyn ExecutorPermissions>> {
    let permissions: Arc<dyn ExecutorPermissions> =
        if config.controller.grant_executor_permissions && config.api.backend == BackendType::Http {
            Arc::new(LambdaPermissions::from_config(config)?)
        } else {
            Arc::new(NoopPermissions)
        };
    Ok(permissions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_selected() {
        let mut config = Config::default();
        config.api.backend = BackendType::Memory;
        let api = create_api(&config).unwrap();
        assert_eq!(api.name(), "memory");
    }

    #[test]
    fn test_http_backend_selected() {
        let mut config = Config::default();
        config.api.backend = BackendType::Http;
        config.api.endpoint = Some("http://localhost:4566".to_string());
        let api = create_api(&config).unwrap();
        assert_eq!(api.name(), "http");
    }
}
