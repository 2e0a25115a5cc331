//! Extraction of extension descriptors from pods and services
//!
//! A pod announces extensions either through its own discovery annotation,
//! in which case the extension is addressed by pod IP, or through the single
//! annotated service selecting it, in which case the extension is addressed by
//! the service's cluster DNS name. Every failure degrades to "no extensions".

use crate::WorkloadKey;
use k8s_openapi::api::core::v1::{Container, Pod, Probe, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use registration_api::{matches_all, ExtensionAnnotation, ExtensionAnnotations, ExtensionDescriptor, LabelMatch};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

pub const CONTAINER_PORT: &str = "ContainerPort";
pub const LIVENESS_PROBE: &str = "LivenessProbe";
pub const READINESS_PROBE: &str = "ReadinessProbe";
pub const SERVICE_PORT: &str = "ServicePort";
pub const DEFAULTED_HEALTH_PORT: &str = "Defaulted HealthPort";

/// Port assumed to serve health checks when a pod declares no HTTP probe
pub const DEFAULT_HEALTH_PORT: i32 = 8081;

/// Label filters applied before a pod is considered
#[derive(Clone, Debug, Default)]
pub struct ExtractorConfig {
    /// When non-empty, pods must carry all of these labels
    pub match_labels: Vec<LabelMatch>,
    /// When non-empty, pods carrying all of these labels are skipped
    pub match_labels_exclude: Vec<LabelMatch>,
}

/// Turns a pod and its selecting services into extension descriptors
#[derive(Clone, Debug, Default)]
pub struct ExtensionExtractor {
    config: ExtractorConfig,
}

impl ExtensionExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// Descriptors announced by `pod`, given the services in its namespace
    /// whose selector matches it
    pub fn extract(&self, pod: &Pod, services: &[Arc<Service>]) -> Vec<ExtensionDescriptor> {
        let key = WorkloadKey::from_pod(pod);
        let empty = BTreeMap::new();
        let labels = pod.metadata.labels.as_ref().unwrap_or(&empty);

        if !self.config.match_labels.is_empty() && !matches_all(labels, &self.config.match_labels) {
            trace!("Skipping {}: does not match matchLabels", key);
            return Vec::new();
        }
        if !self.config.match_labels_exclude.is_empty()
            && matches_all(labels, &self.config.match_labels_exclude)
        {
            trace!("Skipping {}: matches matchLabelsExclude", key);
            return Vec::new();
        }

        let pod_annotations = extension_annotations(&pod.metadata, &key.to_string());
        if !pod_annotations.is_empty() {
            return from_pod_annotations(pod, &key, &pod_annotations);
        }
        from_services(pod, &key, services)
    }
}

fn from_pod_annotations(
    pod: &Pod,
    key: &WorkloadKey,
    annotations: &[ExtensionAnnotation],
) -> Vec<ExtensionDescriptor> {
    let Some(pod_ip) = pod_ip(pod) else {
        warn!("Pod {} has extension annotations but no IP, ignoring", key);
        return Vec::new();
    };

    let ports = pod_ports(pod);
    annotations
        .iter()
        .map(|annotation| {
            ExtensionDescriptor::new(annotation.url_for(pod_ip), ports.clone(), vec![pod_ip.to_string()])
        })
        .collect()
}

fn from_services(pod: &Pod, key: &WorkloadKey, services: &[Arc<Service>]) -> Vec<ExtensionDescriptor> {
    let annotated: Vec<(&Service, Vec<ExtensionAnnotation>)> = services
        .iter()
        .filter_map(|service| {
            let name = service_key(service);
            debug!("Found service {} for pod {}", name, key);
            let annotations = extension_annotations(&service.metadata, &name);
            (!annotations.is_empty()).then_some((service.as_ref(), annotations))
        })
        .collect();

    let (service, annotations) = match annotated.as_slice() {
        [] => return Vec::new(),
        [single] => single,
        many => {
            let names: Vec<String> = many.iter().map(|(s, _)| service_key(s)).collect();
            warn!(
                "Pod {} is selected by {} annotated services ({}), ignoring",
                key,
                many.len(),
                names.join(", ")
            );
            return Vec::new();
        }
    };

    let mut ports: BTreeMap<i32, String> = service
        .spec
        .iter()
        .flat_map(|spec| spec.ports.iter().flatten())
        .map(|port| (port.port, SERVICE_PORT.to_string()))
        .collect();
    ports.extend(pod_ports(pod));

    let mut ips: Vec<String> = service
        .status
        .iter()
        .flat_map(|status| status.load_balancer.iter())
        .flat_map(|lb| lb.ingress.iter().flatten())
        .filter_map(|ingress| ingress.ip.clone())
        .filter(|ip| !ip.is_empty())
        .collect();
    if let Some(ip) = pod_ip(pod) {
        ips.push(ip.to_string());
    }

    let host = format!(
        "{}.{}.svc.cluster.local",
        service.metadata.name.as_deref().unwrap_or_default(),
        service
            .metadata
            .namespace
            .as_deref()
            .unwrap_or(key.namespace.as_str())
    );
    annotations
        .iter()
        .map(|annotation| ExtensionDescriptor::new(annotation.url_for(&host), ports.clone(), ips.clone()))
        .collect()
}

/// Extension entries of the first recognised annotation; malformed or
/// missing annotations yield nothing
fn extension_annotations(metadata: &ObjectMeta, owner: &str) -> Vec<ExtensionAnnotation> {
    let Some(annotations) = metadata.annotations.as_ref() else {
        return Vec::new();
    };
    let Some((key, value)) = ExtensionAnnotations::lookup(annotations) else {
        return Vec::new();
    };
    match ExtensionAnnotations::parse(value) {
        Ok(parsed) => parsed.extensions,
        Err(e) => {
            error!("Failed to parse annotation {} on {}, ignoring: {} (value: {})", key, owner, e, value);
            Vec::new()
        }
    }
}

fn pod_ip(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()
        .and_then(|status| status.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())
}

/// Container ports plus HTTP probe ports of every container
fn pod_ports(pod: &Pod) -> BTreeMap<i32, String> {
    let mut ports = BTreeMap::new();
    let containers = pod.spec.as_ref().map(|spec| spec.containers.as_slice()).unwrap_or_default();
    if containers.is_empty() {
        return ports;
    }

    for container in containers {
        for port in container.ports.iter().flatten() {
            ports.insert(port.container_port, CONTAINER_PORT.to_string());
        }
        if let Some(port) = http_probe_port(container, container.liveness_probe.as_ref()) {
            ports.insert(port, LIVENESS_PROBE.to_string());
        }
        if let Some(port) = http_probe_port(container, container.readiness_probe.as_ref()) {
            ports.insert(port, READINESS_PROBE.to_string());
        }
    }

    let has_probe = ports
        .values()
        .any(|label| label == LIVENESS_PROBE || label == READINESS_PROBE);
    if !has_probe {
        ports.insert(DEFAULT_HEALTH_PORT, DEFAULTED_HEALTH_PORT.to_string());
    }
    ports
}

/// Numeric port of an HTTP probe; named ports resolve against the container
fn http_probe_port(container: &Container, probe: Option<&Probe>) -> Option<i32> {
    match &probe?.http_get.as_ref()?.port {
        IntOrString::Int(port) => Some(*port),
        IntOrString::String(name) => container
            .ports
            .iter()
            .flatten()
            .find(|port| port.name.as_deref() == Some(name.as_str()))
            .map(|port| port.container_port),
    }
}

fn service_key(service: &Service) -> String {
    format!(
        "{}/{}",
        service.metadata.namespace.as_deref().unwrap_or_default(),
        service.metadata.name.as_deref().unwrap_or_default()
    )
}
