//! Coordinators of the loaded Roborock entries, keyed by entry id

use std::sync::Arc;

use dashmap::DashMap;

use crate::coordinator::RoborockDataUpdateCoordinator;

/// At most one coordinator per entry id
#[derive(Default)]
pub struct CoordinatorRegistry {
    coordinators: DashMap<String, Arc<RoborockDataUpdateCoordinator>>,
}

impl CoordinatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entry_id: &str) -> Option<Arc<RoborockDataUpdateCoordinator>> {
        self.coordinators.get(entry_id).map(|r| Arc::clone(r.value()))
    }

    /// Register a coordinator, returning the one it replaced
    pub fn insert(
        &self,
        coordinator: Arc<RoborockDataUpdateCoordinator>,
    ) -> Option<Arc<RoborockDataUpdateCoordinator>> {
        self.coordinators
            .insert(coordinator.entry_id().to_string(), coordinator)
    }

    pub fn remove(&self, entry_id: &str) -> Option<Arc<RoborockDataUpdateCoordinator>> {
        self.coordinators.remove(entry_id).map(|(_, c)| c)
    }

    pub fn contains(&self, entry_id: &str) -> bool {
        self.coordinators.contains_key(entry_id)
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.coordinators.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.coordinators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinators.is_empty()
    }
}
