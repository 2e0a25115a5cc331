//! Cluster connection bootstrap

use hyper::header::{HeaderValue, USER_AGENT};
use kube::{Client, Config};
use registration_core::{CoreError, Result};
use std::time::Duration;
use tracing::info;

pub const CLIENT_USER_AGENT: &str = "steadybit-extension-auto-registration-kubernetes";

/// Connect using the in-cluster config or the local kubeconfig and verify the
/// API server answers
pub async fn create_client(timeout: Duration) -> Result<Client> {
    let mut config = Config::infer()
        .await
        .map_err(|e| CoreError::InvalidConfiguration(format!("could not find kubernetes config: {}", e)))?;
    configure(&mut config, timeout);
    info!("Using kubernetes API at {}", config.cluster_url);

    let client = Client::try_from(config)?;
    let version = client.apiserver_version().await?;
    info!(
        "Cluster connected! Kubernetes server version {} ({})",
        version.git_version, version.platform
    );
    Ok(client)
}

fn configure(config: &mut Config, timeout: Duration) {
    config.connect_timeout = Some(timeout);
    config.read_timeout = Some(timeout);
    config.write_timeout = Some(timeout);
    config.headers.retain(|(name, _)| *name != USER_AGENT);
    config
        .headers
        .push((USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT)));
}
