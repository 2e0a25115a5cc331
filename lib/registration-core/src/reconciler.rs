//! Reconciliation of discovered extensions against the agent's registrations

use crate::scheduler::SyncPass;
use crate::{CoreError, DiscoveryStore, Registrar, RegistrarOperation, Result, SyncMetrics};
use async_trait::async_trait;
use registration_api::ExtensionDescriptor;
use std::sync::Arc;
use tracing::{debug, error, info};

/// The registrar calls one pass has to make
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncPlan {
    /// Remote registrations no workload announces anymore
    pub to_delete: Vec<ExtensionDescriptor>,
    /// Discovered extensions the registrar does not know yet
    pub to_add: Vec<ExtensionDescriptor>,
}

impl SyncPlan {
    /// Diff `remote` against `local` using descriptor equality
    pub fn compute(remote: &[ExtensionDescriptor], local: &[ExtensionDescriptor]) -> Self {
        let to_delete = remote
            .iter()
            .filter(|r| !local.iter().any(|l| l.matches(r)))
            .cloned()
            .collect();

        let mut to_add: Vec<ExtensionDescriptor> = Vec::new();
        for l in local {
            let known = remote.iter().any(|r| r.matches(l));
            let queued = to_add.iter().any(|a| a.matches(l));
            if !known && !queued {
                to_add.push(l.clone());
            }
        }

        Self { to_delete, to_add }
    }

    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_add.is_empty()
    }
}

/// Outcome of a successful pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub registered: usize,
    pub deregistered: usize,
    pub unchanged: usize,
}

/// Reconciler applies the difference between the discovery store and the
/// registrar's current registrations
pub struct Reconciler {
    store: Arc<DiscoveryStore>,
    registrar: Arc<dyn Registrar>,
    metrics: Arc<SyncMetrics>,
}

impl Reconciler {
    pub fn new(store: Arc<DiscoveryStore>, registrar: Arc<dyn Registrar>, metrics: Arc<SyncMetrics>) -> Self {
        Self {
            store,
            registrar,
            metrics,
        }
    }

    /// Run one fetch, diff and apply cycle.
    ///
    /// Deletes go out before adds. A failing call does not stop the others;
    /// every failure is returned in one [`CoreError::SyncFailed`].
    pub async fn reconcile(&self) -> Result<SyncReport> {
        let result = self.apply().await;
        self.metrics.record_pass(result.is_ok());
        result
    }

    async fn apply(&self) -> Result<SyncReport> {
        let remote = match self.registrar.list().await {
            Ok(remote) => {
                self.metrics.record_request(RegistrarOperation::List, true);
                remote
            }
            Err(e) => {
                self.metrics.record_request(RegistrarOperation::List, false);
                error!("Failed to get extension registrations from the agent: {}", e);
                return Err(CoreError::SyncFailed(vec![e]));
            }
        };
        debug!("Agent has {} extension registration(s)", remote.len());

        let local = self.store.snapshot();
        self.metrics.set_discovered(local.len());

        let plan = SyncPlan::compute(&remote, &local);
        let mut report = SyncReport {
            unchanged: remote.len() - plan.to_delete.len(),
            ..Default::default()
        };
        if plan.is_empty() {
            debug!("Registrations already in sync ({} extension(s))", report.unchanged);
            return Ok(report);
        }

        let mut failures = Vec::new();
        for descriptor in &plan.to_delete {
            match self.registrar.deregister(descriptor).await {
                Ok(()) => {
                    self.metrics.record_request(RegistrarOperation::Deregister, true);
                    info!("De-registered extension: {}", descriptor);
                    report.deregistered += 1;
                }
                Err(e) => {
                    self.metrics.record_request(RegistrarOperation::Deregister, false);
                    error!("Failed to deregister extension: {}", e);
                    failures.push(e);
                }
            }
        }
        for descriptor in &plan.to_add {
            match self.registrar.register(descriptor).await {
                Ok(()) => {
                    self.metrics.record_request(RegistrarOperation::Register, true);
                    info!("Registered extension: {}", descriptor);
                    report.registered += 1;
                }
                Err(e) => {
                    self.metrics.record_request(RegistrarOperation::Register, false);
                    error!("Failed to register extension: {}", e);
                    failures.push(e);
                }
            }
        }

        CoreError::join(failures).map(|()| report)
    }
}

#[async_trait]
impl SyncPass for Reconciler {
    async fn sync(&self) -> Result<()> {
        let report = self.reconcile().await?;
        debug!(
            "Registrations synced: {} registered, {} de-registered, {} unchanged",
            report.registered, report.deregistered, report.unchanged
        );
        Ok(())
    }
}
