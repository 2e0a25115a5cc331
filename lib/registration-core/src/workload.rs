//! Workload identity and state helpers

use k8s_openapi::api::core::v1::{Pod, Service};
use registration_api::selector_matches;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// `namespace/name` of a pod
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkloadKey {
    pub namespace: String,
    pub name: String,
}

impl WorkloadKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn from_pod(pod: &Pod) -> Self {
        Self::new(
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        )
    }
}

impl fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Phase `Running` and a `Ready` condition with status `True`
pub fn is_running_and_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    status
        .conditions
        .iter()
        .flatten()
        .any(|cond| cond.type_ == "Ready" && cond.status == "True")
}

/// Whether `service` lives in the pod's namespace and its selector picks the pod
pub fn service_selects_pod(service: &Service, pod: &Pod) -> bool {
    if service.metadata.namespace != pod.metadata.namespace {
        return false;
    }
    let empty = BTreeMap::new();
    let selector = service
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.as_ref())
        .unwrap_or(&empty);
    let labels = pod.metadata.labels.as_ref().unwrap_or(&empty);
    selector_matches(selector, labels)
}

/// Synchronous lookup of the services selecting a pod
pub trait ServiceLookup: Send + Sync {
    fn services_matching_pod(&self, pod: &Pod) -> Vec<Arc<Service>>;
}

impl ServiceLookup for Vec<Arc<Service>> {
    fn services_matching_pod(&self, pod: &Pod) -> Vec<Arc<Service>> {
        self.iter()
            .filter(|service| service_selects_pod(service, pod))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod(phase: &str, ready: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("test-pod".to_string()),
                namespace: Some("default".to_string()),
                labels: Some(BTreeMap::from([("app".to_string(), "extension-xyz".to_string())])),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                conditions: ready.map(|status| {
                    vec![PodCondition {
                        type_: "Ready".to_string(),
                        status: status.to_string(),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn service(namespace: &str, selector: &[(&str, &str)]) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("svc".to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(
                    selector
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_workload_key_display() {
        let key = WorkloadKey::from_pod(&pod("Running", Some("True")));
        assert_eq!(key.to_string(), "default/test-pod");
    }

    #[test]
    fn test_running_and_ready() {
        assert!(is_running_and_ready(&pod("Running", Some("True"))));
        assert!(!is_running_and_ready(&pod("Running", Some("False"))));
        assert!(!is_running_and_ready(&pod("Running", None)));
        assert!(!is_running_and_ready(&pod("Pending", Some("True"))));
        assert!(!is_running_and_ready(&Pod::default()));
    }

    #[test]
    fn test_service_selects_pod() {
        let p = pod("Running", Some("True"));
        assert!(service_selects_pod(&service("default", &[("app", "extension-xyz")]), &p));
        assert!(!service_selects_pod(&service("other", &[("app", "extension-xyz")]), &p));
        assert!(!service_selects_pod(&service("default", &[("app", "other")]), &p));
        assert!(!service_selects_pod(&service("default", &[]), &p));
    }

    #[test]
    fn test_lookup_filters_services() {
        let services: Vec<Arc<Service>> = vec![
            Arc::new(service("default", &[("app", "extension-xyz")])),
            Arc::new(service("default", &[("app", "other")])),
        ];
        assert_eq!(services.services_matching_pod(&pod("Running", Some("True"))).len(), 1);
    }
}
