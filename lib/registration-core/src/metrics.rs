//! Prometheus metrics for registration sync

use crate::{RegistrarOperation, Result};
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Counters and gauges describing reconciliation
#[derive(Clone)]
pub struct SyncMetrics {
    /// Sync passes by outcome
    pub sync_passes_total: IntCounterVec,
    /// Registrar requests by operation and outcome
    pub registrar_requests_total: IntCounterVec,
    /// Descriptors in the discovery store at the last pass
    pub discovered_extensions: IntGauge,
    pub registry: Arc<Registry>,
}

impl SyncMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let sync_passes_total = IntCounterVec::new(
            Opts::new("autoregistration_sync_passes_total", "Reconciliation passes by outcome"),
            &["outcome"],
        )?;
        let registrar_requests_total = IntCounterVec::new(
            Opts::new(
                "autoregistration_registrar_requests_total",
                "Requests to the agent's extensions API",
            ),
            &["operation", "outcome"],
        )?;
        let discovered_extensions = IntGauge::new(
            "autoregistration_discovered_extensions",
            "Extensions discovered in the cluster",
        )?;

        registry.register(Box::new(sync_passes_total.clone()))?;
        registry.register(Box::new(registrar_requests_total.clone()))?;
        registry.register(Box::new(discovered_extensions.clone()))?;

        Ok(Self {
            sync_passes_total,
            registrar_requests_total,
            discovered_extensions,
            registry,
        })
    }

    pub fn record_pass(&self, success: bool) {
        self.sync_passes_total
            .with_label_values(&[outcome(success)])
            .inc();
    }

    pub fn record_request(&self, operation: RegistrarOperation, success: bool) {
        self.registrar_requests_total
            .with_label_values(&[operation.as_str(), outcome(success)])
            .inc();
    }

    pub fn set_discovered(&self, count: usize) {
        self.discovered_extensions.set(count as i64);
    }

    /// Text exposition format
    pub fn gather(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_recorded_values() {
        let metrics = SyncMetrics::new().unwrap();
        metrics.record_pass(true);
        metrics.record_pass(false);
        metrics.record_request(RegistrarOperation::Register, true);
        metrics.set_discovered(3);

        assert_eq!(metrics.sync_passes_total.with_label_values(&["success"]).get(), 1);
        assert_eq!(metrics.sync_passes_total.with_label_values(&["error"]).get(), 1);

        let text = metrics.gather().unwrap();
        assert!(text.contains("autoregistration_discovered_extensions 3"));
        assert!(text.contains(r#"operation="register",outcome="success""#));
    }
}
