//! Model gateway implementations for agentloop.
//!
//! All gateways implement the `agentloop_core::ModelGateway` trait.
//! [`build_gateway`] selects and configures one from the app config.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatGateway;

use agentloop_config::AppConfig;
use agentloop_core::error::GatewayError;
use agentloop_core::gateway::ModelGateway;
use std::sync::Arc;

/// Build the configured gateway.
pub fn build_gateway(config: &AppConfig) -> Result<Arc<dyn ModelGateway>, GatewayError> {
    let gateway = OpenAiCompatGateway::from_config(&config.gateway)?;
    tracing::debug!(gateway = gateway.name(), url = gateway.base_url(), "Gateway configured");
    Ok(Arc::new(gateway))
}
