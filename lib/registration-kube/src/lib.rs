//! Kubernetes watch source for extension auto-registration

pub mod client;
pub mod permissions;
pub mod services;
pub mod trim;
pub mod watch;

pub use client::{create_client, CLIENT_USER_AGENT};
pub use permissions::{check_permissions, PermissionCheck, RequiredPermission, REQUIRED_PERMISSIONS};
pub use services::{service_cache, ServiceIndex};
pub use trim::{trim_pod, trim_service};
pub use watch::{
    run_pod_watch, run_service_watch, PodEventDispatcher, PodRefresh, ServiceEventDispatcher, WatchScope,
};
