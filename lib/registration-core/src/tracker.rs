//! Pod event handling feeding the discovery store

use crate::{is_running_and_ready, DiscoveryStore, ExtensionExtractor, ServiceLookup, SyncTrigger, WorkloadKey};
use k8s_openapi::api::core::v1::Pod;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Callbacks a pod watch source delivers
pub trait PodEventHandler: Send + Sync {
    fn on_add(&self, pod: &Pod);
    fn on_update(&self, old: &Pod, new: &Pod);
    fn on_delete(&self, pod: &Pod);
    /// A full listing finished; `live` holds every pod key it contained
    fn on_relisted(&self, live: &HashSet<WorkloadKey>);
}

/// WorkloadTracker keeps the discovery store in line with pod events and
/// notifies the scheduler whenever the desired state changes
pub struct WorkloadTracker {
    extractor: ExtensionExtractor,
    store: Arc<DiscoveryStore>,
    services: Arc<dyn ServiceLookup>,
    trigger: SyncTrigger,
}

impl WorkloadTracker {
    pub fn new(
        extractor: ExtensionExtractor,
        store: Arc<DiscoveryStore>,
        services: Arc<dyn ServiceLookup>,
        trigger: SyncTrigger,
    ) -> Self {
        Self {
            extractor,
            store,
            services,
            trigger,
        }
    }

    pub fn store(&self) -> &Arc<DiscoveryStore> {
        &self.store
    }

    /// Recompute the descriptors of `pod` and store them
    fn apply(&self, pod: &Pod) {
        let key = WorkloadKey::from_pod(pod);
        let descriptors = if is_running_and_ready(pod) {
            let services = self.services.services_matching_pod(pod);
            self.extractor.extract(pod, &services)
        } else {
            trace!("Pod {} is not running and ready", key);
            Vec::new()
        };

        let count = descriptors.len();
        if self.store.put(key.clone(), descriptors) {
            if count > 0 {
                debug!("Pod {} announces {} extension(s)", key, count);
            } else {
                debug!("Pod {} no longer announces extensions", key);
            }
            self.trigger.notify();
        }
    }

    fn remove(&self, key: &WorkloadKey) {
        if let Some(descriptors) = self.store.delete(key) {
            debug!("Removing {} extension(s) of pod {}", descriptors.len(), key);
            self.trigger.notify();
        }
    }
}

impl PodEventHandler for WorkloadTracker {
    fn on_add(&self, pod: &Pod) {
        trace!("Pod added: {}", WorkloadKey::from_pod(pod));
        self.apply(pod);
    }

    fn on_update(&self, _old: &Pod, new: &Pod) {
        trace!("Pod updated: {}", WorkloadKey::from_pod(new));
        self.apply(new);
    }

    fn on_delete(&self, pod: &Pod) {
        let key = WorkloadKey::from_pod(pod);
        trace!("Pod deleted: {}", key);
        self.remove(&key);
    }

    fn on_relisted(&self, live: &HashSet<WorkloadKey>) {
        let stale = self.store.retain_keys(live);
        if !stale.is_empty() {
            info!("Dropped {} workload(s) missing after relist", stale.len());
        }
        // a pass also cleans registrations left over from a previous run
        self.trigger.notify();
    }
}
