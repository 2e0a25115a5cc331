//! Strip watched objects down to what extraction reads

use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodStatus, Service, ServiceSpec, ServiceStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::mem::take;

/// Keeps identity, labels, annotations, container ports and probes, and the
/// phase/conditions/IP of the status
pub fn trim_pod(pod: &mut Pod) {
    let meta = take(&mut pod.metadata);
    pod.metadata = ObjectMeta {
        name: meta.name,
        namespace: meta.namespace,
        labels: meta.labels,
        annotations: meta.annotations,
        ..Default::default()
    };

    pod.spec = pod.spec.take().map(|spec| PodSpec {
        containers: spec
            .containers
            .into_iter()
            .map(|container| Container {
                name: container.name,
                ports: container.ports,
                liveness_probe: container.liveness_probe,
                readiness_probe: container.readiness_probe,
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    });

    pod.status = pod.status.take().map(|status| PodStatus {
        phase: status.phase,
        conditions: status.conditions,
        pod_ip: status.pod_ip,
        ..Default::default()
    });
}

/// Keeps identity, annotations, selector, ports and load balancer status
pub fn trim_service(service: &mut Service) {
    let meta = take(&mut service.metadata);
    service.metadata = ObjectMeta {
        name: meta.name,
        namespace: meta.namespace,
        annotations: meta.annotations,
        ..Default::default()
    };

    service.spec = service.spec.take().map(|spec| ServiceSpec {
        selector: spec.selector,
        ports: spec.ports,
        ..Default::default()
    });

    service.status = service.status.take().map(|status| ServiceStatus {
        load_balancer: status.load_balancer,
        ..Default::default()
    });
}
