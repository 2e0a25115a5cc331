//! HTTP client for the agent's extensions API

use async_trait::async_trait;
use registration_api::ExtensionDescriptor;
use registration_core::{CoreError, Registrar, RegistrarOperation, Result};
use reqwest::header::ACCEPT;
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::{debug, trace};

/// User name the agent expects alongside the agent key
pub const AGENT_USER: &str = "_";

/// Connection settings for the agent
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// e.g. `http://localhost:42899`
    pub base_url: String,
    /// Secret sent as basic auth password on mutating calls
    pub agent_key: String,
    /// Timeout for a single request
    pub timeout: Duration,
}

impl AgentConfig {
    pub fn localhost(port: u16, agent_key: impl Into<String>) -> Self {
        Self {
            base_url: format!("http://localhost:{}", port),
            agent_key: agent_key.into(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// AgentRegistrar talks to `GET|POST|DELETE /extensions` on the agent
pub struct AgentRegistrar {
    client: Client,
    extensions_url: String,
    agent_key: String,
}

impl AgentRegistrar {
    pub fn new(config: AgentConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CoreError::InvalidConfiguration(format!("agent HTTP client: {}", e)))?;

        Ok(Self {
            client,
            extensions_url: format!("{}/extensions", config.base_url.trim_end_matches('/')),
            agent_key: config.agent_key,
        })
    }

    pub fn extensions_url(&self) -> &str {
        &self.extensions_url
    }

    async fn send(
        &self,
        method: Method,
        operation: RegistrarOperation,
        descriptor: &ExtensionDescriptor,
    ) -> Result<()> {
        let response = self
            .client
            .request(method, &self.extensions_url)
            .basic_auth(AGENT_USER, Some(&self.agent_key))
            .json(descriptor)
            .send()
            .await
            .map_err(|e| transport_error(operation, descriptor.to_string(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::RegistrarStatus {
                operation,
                target: descriptor.to_string(),
                status: status.as_u16(),
            });
        }
        debug!("Agent accepted {} of {}", operation, descriptor);
        Ok(())
    }
}

#[async_trait]
impl Registrar for AgentRegistrar {
    async fn list(&self) -> Result<Vec<ExtensionDescriptor>> {
        let operation = RegistrarOperation::List;
        let response = self
            .client
            .get(&self.extensions_url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| transport_error(operation, self.extensions_url.clone(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::RegistrarStatus {
                operation,
                target: self.extensions_url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(operation, self.extensions_url.clone(), e))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            trace!("No extension registrations found on the agent");
            return Ok(Vec::new());
        }

        let registrations: Option<Vec<ExtensionDescriptor>> = serde_json::from_slice(&body)?;
        let registrations = registrations.unwrap_or_default();
        trace!("Got {} extension registration(s) from the agent", registrations.len());
        Ok(registrations)
    }

    async fn register(&self, descriptor: &ExtensionDescriptor) -> Result<()> {
        self.send(Method::POST, RegistrarOperation::Register, descriptor).await
    }

    async fn deregister(&self, descriptor: &ExtensionDescriptor) -> Result<()> {
        self.send(Method::DELETE, RegistrarOperation::Deregister, descriptor).await
    }
}

fn transport_error(operation: RegistrarOperation, target: String, e: reqwest::Error) -> CoreError {
    CoreError::Registrar {
        operation,
        target,
        message: e.to_string(),
    }
}
