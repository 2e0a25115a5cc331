//! Service lookup over the local reflector cache

use k8s_openapi::api::core::v1::{Pod, Service};
use kube_runtime::reflector::store::{Writer, WriterDropped};
use kube_runtime::reflector::Store;
use registration_core::{service_selects_pod, ServiceLookup};
use std::sync::Arc;

/// An empty service cache; the writer half goes to the service watch
pub fn service_cache() -> (ServiceIndex, Writer<Service>) {
    let writer = Writer::default();
    (ServiceIndex::new(writer.as_reader()), writer)
}

/// ServiceIndex answers which cached services select a pod
#[derive(Clone)]
pub struct ServiceIndex {
    store: Store<Service>,
}

impl ServiceIndex {
    pub fn new(store: Store<Service>) -> Self {
        Self { store }
    }

    /// Resolves once the first full service listing is cached
    pub async fn wait_until_ready(&self) -> Result<(), WriterDropped> {
        self.store.wait_until_ready().await
    }

    pub fn len(&self) -> usize {
        self.store.state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ServiceLookup for ServiceIndex {
    fn services_matching_pod(&self, pod: &Pod) -> Vec<Arc<Service>> {
        self.store
            .state()
            .into_iter()
            .filter(|service| service_selects_pod(service, pod))
            .collect()
    }
}
