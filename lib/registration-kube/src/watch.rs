//! Pod and service watches feeding a [`PodEventHandler`]

use crate::{trim_pod, trim_service, ServiceIndex};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource};
use kube_runtime::reflector::store::Writer;
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::watcher::{self, Event};
use kube_runtime::WatchStreamExt;
use registration_core::{PodEventHandler, WorkloadKey};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Pods to re-evaluate after the service cache changed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PodRefresh {
    Namespace(String),
    All,
}

impl PodRefresh {
    fn covers(&self, pod: &Pod) -> bool {
        match self {
            PodRefresh::Namespace(ns) => pod.metadata.namespace.as_deref() == Some(ns.as_str()),
            PodRefresh::All => true,
        }
    }
}

/// Cluster-wide or restricted to a single namespace
#[derive(Clone)]
pub struct WatchScope {
    client: Client,
    namespace: Option<String>,
}

impl WatchScope {
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self {
            client,
            namespace: namespace.filter(|ns| !ns.is_empty()),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Turns pod watch events into handler callbacks while maintaining the local
/// pod cache. Old objects for updates come from that cache.
pub struct PodEventDispatcher {
    writer: Writer<Pod>,
    reader: Store<Pod>,
    handler: Arc<dyn PodEventHandler>,
    relisting: Option<HashSet<WorkloadKey>>,
}

impl PodEventDispatcher {
    pub fn new(handler: Arc<dyn PodEventHandler>) -> Self {
        let writer = Writer::default();
        let reader = writer.as_reader();
        Self {
            writer,
            reader,
            handler,
            relisting: None,
        }
    }

    pub fn reader(&self) -> Store<Pod> {
        self.reader.clone()
    }

    pub fn handle(&mut self, event: Event<Pod>) {
        match &event {
            Event::Apply(pod) => {
                let old = self.reader.get(&ObjectRef::from_obj(pod));
                self.writer.apply_watcher_event(&event);
                self.applied(old, pod);
            }
            Event::Delete(pod) => {
                self.writer.apply_watcher_event(&event);
                self.handler.on_delete(pod);
            }
            Event::Init => {
                debug!("Pod list started");
                self.relisting = Some(HashSet::new());
                self.writer.apply_watcher_event(&event);
            }
            Event::InitApply(pod) => {
                let old = self.reader.get(&ObjectRef::from_obj(pod));
                self.writer.apply_watcher_event(&event);
                if let Some(live) = self.relisting.as_mut() {
                    live.insert(WorkloadKey::from_pod(pod));
                }
                self.applied(old, pod);
            }
            Event::InitDone => {
                self.writer.apply_watcher_event(&event);
                let live = self.relisting.take().unwrap_or_default();
                info!("Pod list complete, {} pod(s) in cache", live.len());
                self.handler.on_relisted(&live);
            }
        }
    }

    /// Re-run the handler for cached pods the refresh covers. Must be called
    /// from the task that calls [`Self::handle`].
    pub fn refresh(&self, refresh: &PodRefresh) {
        for pod in self.reader.state() {
            if refresh.covers(&pod) {
                self.handler.on_update(&pod, &pod);
            }
        }
    }

    fn applied(&self, old: Option<Arc<Pod>>, pod: &Pod) {
        match old {
            Some(old) => self.handler.on_update(&old, pod),
            None => self.handler.on_add(pod),
        }
    }
}

/// Maintains the service cache and asks the pod watch to re-evaluate the pods
/// a service change can affect
pub struct ServiceEventDispatcher {
    writer: Writer<Service>,
    refreshes: mpsc::UnboundedSender<PodRefresh>,
}

impl ServiceEventDispatcher {
    pub fn new(writer: Writer<Service>, refreshes: mpsc::UnboundedSender<PodRefresh>) -> Self {
        Self { writer, refreshes }
    }

    pub fn index(&self) -> ServiceIndex {
        ServiceIndex::new(self.writer.as_reader())
    }

    pub fn handle(&mut self, event: Event<Service>) {
        self.writer.apply_watcher_event(&event);
        let refresh = match &event {
            Event::Apply(service) | Event::Delete(service) => {
                let namespace = service.metadata.namespace.clone().unwrap_or_default();
                debug!(
                    "Service {}/{} changed",
                    namespace,
                    service.metadata.name.as_deref().unwrap_or_default()
                );
                PodRefresh::Namespace(namespace)
            }
            Event::InitDone => {
                info!("Service list complete");
                PodRefresh::All
            }
            Event::Init | Event::InitApply(_) => return,
        };
        if self.refreshes.send(refresh).is_err() {
            trace!("Pod watch stopped, dropping pod refresh");
        }
    }
}

/// Watch pods until the stream ends; watch errors are retried with backoff.
/// Refresh requests from the service watch are applied between pod events.
pub async fn run_pod_watch(
    api: Api<Pod>,
    mut dispatcher: PodEventDispatcher,
    mut refreshes: mpsc::UnboundedReceiver<PodRefresh>,
) {
    let mut stream = watcher::watcher(api, watcher::Config::default())
        .default_backoff()
        .modify(trim_pod)
        .boxed();

    info!("Watching pods");
    loop {
        tokio::select! {
            event = stream.next() => match event {
                Some(Ok(event)) => dispatcher.handle(event),
                Some(Err(e)) => warn!("Pod watch failed: {}", e),
                None => break,
            },
            Some(refresh) = refreshes.recv() => dispatcher.refresh(&refresh),
        }
    }
    warn!("Pod watch stream ended");
}

/// Watch services until the stream ends; watch errors are retried with backoff
pub async fn run_service_watch(api: Api<Service>, mut dispatcher: ServiceEventDispatcher) {
    let mut stream = watcher::watcher(api, watcher::Config::default())
        .default_backoff()
        .modify(trim_service)
        .boxed();

    info!("Watching services");
    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => dispatcher.handle(event),
            Err(e) => warn!("Service watch failed: {}", e),
        }
    }
    warn!("Service watch stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodCondition, PodSpec, PodStatus, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use crate::services::service_cache;
    use registration_api::annotation::ANNOTATION_KEY;
    use registration_core::{
        DiscoveryStore, ExtensionExtractor, ExtractorConfig, SchedulerConfig, ServiceLookup,
        SyncPass, SyncScheduler, WorkloadTracker,
    };
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingHandler {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }

        fn push(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl PodEventHandler for RecordingHandler {
        fn on_add(&self, pod: &Pod) {
            self.push(format!("add {}", WorkloadKey::from_pod(pod)));
        }

        fn on_update(&self, _old: &Pod, new: &Pod) {
            self.push(format!("update {}", WorkloadKey::from_pod(new)));
        }

        fn on_delete(&self, pod: &Pod) {
            self.push(format!("delete {}", WorkloadKey::from_pod(pod)));
        }

        fn on_relisted(&self, live: &HashSet<WorkloadKey>) {
            let mut keys: Vec<String> = live.iter().map(ToString::to_string).collect();
            keys.sort();
            self.push(format!("relisted [{}]", keys.join(",")));
        }
    }

    fn labels() -> BTreeMap<String, String> {
        BTreeMap::from([("app".to_string(), "ext".to_string())])
    }

    fn pod(namespace: &str, name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn service(namespace: &str, name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(labels()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_events() {
        let handler = Arc::new(RecordingHandler::default());
        let mut dispatcher = PodEventDispatcher::new(handler.clone());

        dispatcher.handle(Event::Apply(pod("default", "a")));
        dispatcher.handle(Event::Apply(pod("default", "a")));
        dispatcher.handle(Event::Delete(pod("default", "a")));

        assert_eq!(
            handler.take(),
            vec!["add default/a", "update default/a", "delete default/a"]
        );
        assert!(dispatcher.reader().state().is_empty());
    }

    #[test]
    fn test_relist_reports_live_pods() {
        let handler = Arc::new(RecordingHandler::default());
        let mut dispatcher = PodEventDispatcher::new(handler.clone());

        dispatcher.handle(Event::Apply(pod("default", "a")));
        dispatcher.handle(Event::Apply(pod("default", "b")));
        handler.take();

        dispatcher.handle(Event::Init);
        dispatcher.handle(Event::InitApply(pod("default", "a")));
        dispatcher.handle(Event::InitApply(pod("default", "c")));
        dispatcher.handle(Event::InitDone);

        assert_eq!(
            handler.take(),
            vec![
                "update default/a",
                "add default/c",
                "relisted [default/a,default/c]"
            ]
        );
        let mut cached: Vec<String> = dispatcher
            .reader()
            .state()
            .iter()
            .map(|pod| WorkloadKey::from_pod(pod).to_string())
            .collect();
        cached.sort();
        assert_eq!(cached, vec!["default/a", "default/c"]);
    }

    #[test]
    fn test_empty_initial_list_still_relists() {
        let handler = Arc::new(RecordingHandler::default());
        let mut dispatcher = PodEventDispatcher::new(handler.clone());

        dispatcher.handle(Event::Init);
        dispatcher.handle(Event::InitDone);
        assert_eq!(handler.take(), vec!["relisted []"]);
    }

    #[test]
    fn test_service_change_requests_namespace_refresh() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut services = ServiceEventDispatcher::new(Writer::default(), tx);
        let index = services.index();

        services.handle(Event::Apply(service("default", "ext")));
        assert_eq!(rx.try_recv().unwrap(), PodRefresh::Namespace("default".to_string()));
        assert_eq!(index.services_matching_pod(&pod("default", "a")).len(), 1);
        assert!(index.services_matching_pod(&pod("other", "b")).is_empty());

        services.handle(Event::Delete(service("default", "ext")));
        assert_eq!(rx.try_recv().unwrap(), PodRefresh::Namespace("default".to_string()));
        assert!(index.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_service_list_requests_full_refresh() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (index, writer) = service_cache();
        let mut services = ServiceEventDispatcher::new(writer, tx);

        services.handle(Event::Init);
        services.handle(Event::InitApply(service("other", "ext")));
        assert!(rx.try_recv().is_err());

        services.handle(Event::InitDone);
        assert_eq!(rx.try_recv().unwrap(), PodRefresh::All);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_service_events_after_pod_watch_stopped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut services = ServiceEventDispatcher::new(Writer::default(), tx);
        services.handle(Event::Apply(service("default", "ext")));
        assert_eq!(services.index().len(), 1);
    }

    #[test]
    fn test_refresh_covers_namespace_or_all() {
        let handler = Arc::new(RecordingHandler::default());
        let mut pods = PodEventDispatcher::new(handler.clone());
        pods.handle(Event::Apply(pod("default", "a")));
        pods.handle(Event::Apply(pod("other", "b")));
        handler.take();

        pods.refresh(&PodRefresh::Namespace("default".to_string()));
        assert_eq!(handler.take(), vec!["update default/a"]);

        pods.refresh(&PodRefresh::All);
        let mut calls = handler.take();
        calls.sort();
        assert_eq!(calls, vec!["update default/a", "update other/b"]);
    }

    #[test]
    fn test_refresh_queued_before_delete_skips_deleted_pod() {
        let handler = Arc::new(RecordingHandler::default());
        let mut pods = PodEventDispatcher::new(handler.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut services = ServiceEventDispatcher::new(Writer::default(), tx);

        pods.handle(Event::Apply(pod("default", "a")));
        services.handle(Event::Apply(service("default", "ext")));
        pods.handle(Event::Delete(pod("default", "a")));

        let refresh = rx.try_recv().unwrap();
        pods.refresh(&refresh);

        assert_eq!(handler.take(), vec!["add default/a", "delete default/a"]);
    }

    struct NoopPass;

    #[async_trait::async_trait]
    impl SyncPass for NoopPass {
        async fn sync(&self) -> registration_core::Result<()> {
            Ok(())
        }
    }

    fn ready_pod(name: &str) -> Pod {
        let mut pod = pod("default", name);
        pod.metadata.annotations = Some(BTreeMap::from([(
            ANNOTATION_KEY.to_string(),
            r#"{"extensions":[{"port":8080,"protocol":"http"}]}"#.to_string(),
        )]));
        pod.spec = Some(PodSpec {
            containers: vec![Container {
                name: "ext".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });
        pod.status = Some(PodStatus {
            phase: Some("Running".to_string()),
            pod_ip: Some("10.0.0.1".to_string()),
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        pod
    }

    #[test]
    fn test_deleted_pod_stays_out_of_store_after_service_refresh() {
        let (_scheduler, trigger) = SyncScheduler::new(SchedulerConfig::default(), NoopPass);
        let (index, writer) = service_cache();
        let store = Arc::new(DiscoveryStore::new());
        let tracker = Arc::new(WorkloadTracker::new(
            ExtensionExtractor::new(ExtractorConfig::default()),
            store.clone(),
            Arc::new(index),
            trigger,
        ));
        let mut pods = PodEventDispatcher::new(tracker);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut services = ServiceEventDispatcher::new(writer, tx);

        pods.handle(Event::Apply(ready_pod("a")));
        assert_eq!(store.descriptor_count(), 1);

        services.handle(Event::Apply(service("default", "ext")));
        pods.handle(Event::Delete(ready_pod("a")));
        pods.refresh(&rx.try_recv().unwrap());

        assert!(store.is_empty());
    }
}
