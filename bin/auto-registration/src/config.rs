//! Command line and environment configuration

use clap::{Parser, ValueEnum};
use registration_agent::AgentConfig;
use registration_api::{parse_label_matches, LabelMatch};
use registration_core::{ExtractorConfig, SchedulerConfig};
use std::time::Duration;

/// Registers extensions discovered in Kubernetes with the local Steadybit agent
#[derive(Parser, Debug, Clone)]
#[command(name = "auto-registration")]
#[command(about = "Registers extensions announced by Kubernetes pods and services with the local agent")]
pub struct Args {
    /// Key the agent expects on registration calls
    #[arg(long, env = "STEADYBIT_EXTENSION_AGENT_KEY", hide_env_values = true)]
    pub agent_key: String,

    /// Port of the agent on localhost
    #[arg(long, env = "STEADYBIT_EXTENSION_AGENT_PORT", default_value = "42899")]
    pub agent_port: u16,

    /// Full agent base URL, overrides --agent-port
    #[arg(long, env = "STEADYBIT_EXTENSION_AGENT_URL")]
    pub agent_url: Option<String>,

    /// Seconds to wait before the first discovery so the agent can start
    #[arg(long, env = "STEADYBIT_EXTENSION_INITIAL_DELAY", default_value = "5")]
    pub initial_delay_seconds: u64,

    /// Only watch this namespace
    #[arg(long, env = "STEADYBIT_EXTENSION_NAMESPACE_FILTER")]
    pub namespace_filter: Option<String>,

    /// Pods must carry all of these labels, e.g. `[{"key":"app","value":"ext"}]`
    #[arg(long, env = "STEADYBIT_EXTENSION_MATCH_LABELS", default_value = "", value_parser = parse_labels)]
    pub match_labels: Labels,

    /// Pods carrying all of these labels are skipped
    #[arg(long, env = "STEADYBIT_EXTENSION_MATCH_LABELS_EXCLUDE", default_value = "", value_parser = parse_labels)]
    pub match_labels_exclude: Labels,

    /// Quiet period after the last change before registrations are synced
    #[arg(long, env = "STEADYBIT_EXTENSION_SYNC_DEBOUNCE_MS", default_value = "1000")]
    pub sync_debounce_ms: u64,

    /// Delay before a failed sync is retried
    #[arg(long, env = "STEADYBIT_EXTENSION_SYNC_RETRY_MS", default_value = "10000")]
    pub sync_retry_ms: u64,

    /// Periodic full sync, 0 disables
    #[arg(long, env = "STEADYBIT_EXTENSION_RESYNC_INTERVAL_SECONDS")]
    pub resync_interval_seconds: Option<u64>,

    /// Timeout for Kubernetes and agent requests
    #[arg(long, env = "STEADYBIT_EXTENSION_REQUEST_TIMEOUT_SECONDS", default_value = "10")]
    pub request_timeout_seconds: u64,

    /// Port serving /healthz and /metrics
    #[arg(long, env = "STEADYBIT_EXTENSION_HEALTH_PORT", default_value = "8083")]
    pub health_port: u16,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "STEADYBIT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "STEADYBIT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Parsed label list argument
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Labels(pub Vec<LabelMatch>);

fn parse_labels(text: &str) -> Result<Labels, String> {
    parse_label_matches(text)
        .map(Labels)
        .map_err(|e| format!("expected [{{\"key\":..,\"value\":..}}]: {}", e))
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent_key.trim().is_empty() {
            anyhow::bail!("agent key must not be empty");
        }
        if self.sync_debounce_ms == 0 {
            anyhow::bail!("sync debounce must be greater than 0");
        }
        if self.sync_retry_ms == 0 {
            anyhow::bail!("sync retry delay must be greater than 0");
        }
        if self.request_timeout_seconds == 0 {
            anyhow::bail!("request timeout must be greater than 0");
        }
        Ok(())
    }

    pub fn agent_config(&self) -> AgentConfig {
        let base_url = match &self.agent_url {
            Some(url) if !url.is_empty() => url.clone(),
            _ => format!("http://localhost:{}", self.agent_port),
        };
        AgentConfig {
            base_url,
            agent_key: self.agent_key.clone(),
            timeout: self.request_timeout(),
        }
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            match_labels: self.match_labels.0.clone(),
            match_labels_exclude: self.match_labels_exclude.0.clone(),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            debounce: Duration::from_millis(self.sync_debounce_ms),
            retry_delay: Duration::from_millis(self.sync_retry_ms),
            resync_interval: self
                .resync_interval_seconds
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace_filter.as_deref().filter(|ns| !ns.is_empty())
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}
