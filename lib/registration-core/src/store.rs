//! Discovery store holding the extensions each workload announces

use crate::WorkloadKey;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use registration_api::ExtensionDescriptor;
use std::collections::HashSet;
use tracing::debug;

/// DiscoveryStore maps each workload to the descriptors it last produced.
///
/// Writers replace or remove a whole entry at once, so a snapshot never sees
/// a partially updated descriptor list for a workload.
#[derive(Debug, Default)]
pub struct DiscoveryStore {
    workloads: DashMap<WorkloadKey, Vec<ExtensionDescriptor>>,
}

impl DiscoveryStore {
    pub fn new() -> Self {
        Self {
            workloads: DashMap::new(),
        }
    }

    /// Replace the descriptors of `key`; an empty list removes the workload.
    /// Returns whether the stored state changed.
    pub fn put(&self, key: WorkloadKey, descriptors: Vec<ExtensionDescriptor>) -> bool {
        if descriptors.is_empty() {
            return self.delete(&key).is_some();
        }
        match self.workloads.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get() == &descriptors {
                    false
                } else {
                    debug!("Updated {} extension(s) for {}", descriptors.len(), entry.key());
                    entry.insert(descriptors);
                    true
                }
            }
            Entry::Vacant(entry) => {
                debug!("Added {} extension(s) for {}", descriptors.len(), entry.key());
                entry.insert(descriptors);
                true
            }
        }
    }

    /// Remove a workload, returning what it announced
    pub fn delete(&self, key: &WorkloadKey) -> Option<Vec<ExtensionDescriptor>> {
        let removed = self.workloads.remove(key).map(|(_, descriptors)| descriptors);
        if let Some(descriptors) = &removed {
            debug!("Removed {} extension(s) for {}", descriptors.len(), key);
        }
        removed
    }

    pub fn get(&self, key: &WorkloadKey) -> Option<Vec<ExtensionDescriptor>> {
        self.workloads.get(key).map(|entry| entry.value().clone())
    }

    /// All descriptors across workloads, ordered by workload key
    pub fn snapshot(&self) -> Vec<ExtensionDescriptor> {
        let mut entries: Vec<(WorkloadKey, Vec<ExtensionDescriptor>)> = self
            .workloads
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().flat_map(|(_, descriptors)| descriptors).collect()
    }

    pub fn keys(&self) -> Vec<WorkloadKey> {
        self.workloads.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drop every workload not in `live`, returning the removed keys
    pub fn retain_keys(&self, live: &HashSet<WorkloadKey>) -> Vec<WorkloadKey> {
        let stale: Vec<WorkloadKey> = self
            .keys()
            .into_iter()
            .filter(|key| !live.contains(key))
            .collect();
        stale
            .into_iter()
            .filter(|key| self.delete(key).is_some())
            .collect()
    }

    pub fn descriptor_count(&self) -> usize {
        self.workloads.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }
}
