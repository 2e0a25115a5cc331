//! Extension auto-registration engine
//!
//! This library provides:
//! - Extension extraction from pods and the services selecting them
//! - A discovery store holding the desired registrations per workload
//! - Reconciliation of the desired state against the agent's registrations
//! - A debouncing sync scheduler with retry after failed passes

pub mod error;
pub mod extractor;
pub mod metrics;
pub mod reconciler;
pub mod registrar;
pub mod scheduler;
pub mod store;
pub mod tracker;
pub mod workload;

pub use error::{CoreError, Result};
pub use extractor::{ExtensionExtractor, ExtractorConfig};
pub use metrics::SyncMetrics;
pub use reconciler::{Reconciler, SyncPlan, SyncReport};
pub use registrar::{Registrar, RegistrarOperation};
pub use scheduler::{SchedulerConfig, SyncPass, SyncScheduler, SyncState, SyncTrigger};
pub use store::DiscoveryStore;
pub use tracker::{PodEventHandler, WorkloadTracker};
pub use workload::{is_running_and_ready, service_selects_pod, ServiceLookup, WorkloadKey};
