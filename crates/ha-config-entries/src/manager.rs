//! Config Entries Manager
//!
//! Manages the lifecycle of configuration entries: persistence, setup,
//! unload, reload, platform forwarding and update listeners.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::DashMap;
use ha_core::Platform;
use ha_storage::{Storable, Storage, StorageResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
use crate::integration::{EntityPlatform, Integration, ListenerId, SetupError, UpdateListener};
use crate::state_machine::{calculate_retry_delay, InvalidTransition};

/// Storage key for config entries
pub const STORAGE_KEY: &str = "core.config_entries";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 5;

/// Config entries errors
#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("Cannot unload entry in state {0:?}")]
    CannotUnload(ConfigEntryState),

    #[error("Setup failed: {0}")]
    SetupFailed(String),

    #[error("Setup not ready: {0}")]
    NotReady(String),

    #[error("Unload failed for entry {0}")]
    UnloadFailed(String),

    #[error(transparent)]
    InvalidState(#[from] InvalidTransition),

    #[error("Storage error: {0}")]
    Storage(#[from] ha_storage::StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Config entries data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    /// All config entries
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Config Entries Manager
///
/// Owns every config entry and drives the registered integrations through
/// setup and unload. Integrations hold the manager through an `Arc` so they
/// can forward entries to platforms and register update listeners.
pub struct ConfigEntries {
    /// Storage backend
    storage: Arc<Storage>,

    /// Primary index: entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// Index: domain -> set of entry_ids
    by_domain: DashMap<String, HashSet<String>>,

    /// Index: (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    /// Serializes setup/unload
    setup_lock: Mutex<()>,

    /// Integrations by domain
    integrations: DashMap<String, Arc<dyn Integration>>,

    /// Entity platforms by (integration domain, platform)
    platforms: DashMap<(String, Platform), Arc<dyn EntityPlatform>>,

    /// Update listeners by entry_id
    update_listeners: DashMap<String, Vec<(ListenerId, UpdateListener)>>,

    /// Pending setup retries by entry_id
    retry_tasks: DashMap<String, JoinHandle<()>>,

    next_listener_id: AtomicU64,
}

impl ConfigEntries {
    /// Create a new config entries manager
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            setup_lock: Mutex::new(()),
            integrations: DashMap::new(),
            platforms: DashMap::new(),
            update_listeners: DashMap::new(),
            retry_tasks: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Load entries from storage
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(data) = self.storage.load::<ConfigEntriesData>().await? {
            info!("Loading {} config entries from storage", data.entries.len());

            for entry in data.entries {
                self.index_entry(&entry);
            }
        }
        Ok(())
    }

    /// Save entries to storage
    pub async fn save(&self) -> StorageResult<()> {
        let data = ConfigEntriesData {
            entries: self.entries.iter().map(|r| r.value().clone()).collect(),
        };

        self.storage.save(&data).await?;
        debug!("Saved {} config entries to storage", data.entries.len());
        Ok(())
    }

    fn index_entry(&self, entry: &ConfigEntry) {
        let entry_id = entry.entry_id.clone();

        self.entries.insert(entry_id.clone(), entry.clone());

        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry_id.clone());

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert((entry.domain.clone(), unique_id.clone()), entry_id);
        }
    }

    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }

        self.entries.remove(&entry.entry_id);
    }

    /// Get an entry by ID
    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    /// Get all entries for a domain
    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        let ids: Vec<String> = self
            .by_domain
            .get(domain)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Get entry by unique_id
    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        let entry_id = self
            .by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .map(|r| r.value().clone())?;
        self.get(&entry_id)
    }

    /// Add a new config entry
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(&entry);
        self.save().await?;

        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );

        Ok(entry)
    }

    /// Update an existing entry.
    ///
    /// When data, options or title actually change, the entry's update
    /// listeners run (in registration order) before this returns.
    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if let Some(Some(ref unique_id)) = update.unique_id {
            let taken = self
                .get_by_unique_id(&entry.domain, unique_id)
                .is_some_and(|other| other.entry_id != entry.entry_id);
            if taken {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.unindex_entry(&entry);

        let mut updated = entry.clone();
        if let Some(title) = update.title {
            updated.title = title;
        }
        if let Some(data) = update.data {
            updated.data = data;
        }
        if let Some(options) = update.options {
            updated.options = options;
        }
        if let Some(unique_id) = update.unique_id {
            updated.unique_id = unique_id;
        }

        let changed = updated.title != entry.title
            || updated.data != entry.data
            || updated.options != entry.options
            || updated.unique_id != entry.unique_id;
        if changed {
            updated.modified_at = Utc::now();
        }

        self.index_entry(&updated);
        self.save().await?;
        debug!("Updated config entry: {}", entry_id);

        if changed {
            let listeners: Vec<UpdateListener> = self
                .update_listeners
                .get(entry_id)
                .map(|l| l.iter().map(|(_, listener)| Arc::clone(listener)).collect())
                .unwrap_or_default();

            for listener in listeners {
                listener(updated.clone()).await;
            }
        }

        Ok(updated)
    }

    /// Remove an entry, unloading it first
    pub async fn remove(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.state.is_recoverable() {
            if !self.unload(entry_id).await? {
                warn!("Removing entry {} that failed to unload", entry_id);
            }
        }

        self.update_listeners.remove(entry_id);
        self.unindex_entry(&entry);
        self.save().await?;

        info!(
            "Removed config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry_id
        );

        Ok(entry)
    }

    /// Move an entry to a new state, validated by the state machine
    fn transition(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        entry.try_set_state(state, reason)?;
        debug!("Entry {} state changed to {:?}", entry_id, state);
        Ok(())
    }

    /// Register an integration; replaces any previous one for the same domain
    pub fn register_integration(&self, integration: Arc<dyn Integration>) {
        let domain = integration.domain().to_string();
        debug!("Registered integration: {}", domain);
        self.integrations.insert(domain, integration);
    }

    /// Register the entity platform `platform` of integration `domain`
    pub fn register_platform(
        &self,
        domain: &str,
        platform: Platform,
        handler: Arc<dyn EntityPlatform>,
    ) {
        self.platforms
            .insert((domain.to_string(), platform), handler);
        debug!("Registered platform {}.{}", domain, platform);
    }

    fn integration(&self, domain: &str) -> Option<Arc<dyn Integration>> {
        self.integrations.get(domain).map(|r| Arc::clone(r.value()))
    }

    fn platform(&self, domain: &str, platform: Platform) -> Option<Arc<dyn EntityPlatform>> {
        self.platforms
            .get(&(domain.to_string(), platform))
            .map(|r| Arc::clone(r.value()))
    }

    /// Setup an entry (call integration's setup)
    pub async fn setup(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;
        self.setup_locked(entry_id).await
    }

    async fn setup_locked(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<()> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.is_disabled() {
            debug!("Skipping setup for disabled entry: {}", entry_id);
            return Ok(());
        }

        self.transition(entry_id, ConfigEntryState::SetupInProgress, None)?;

        let Some(integration) = self.integration(&entry.domain) else {
            self.transition(entry_id, ConfigEntryState::Loaded, None)?;
            debug!(
                "No integration for domain {}, marking as loaded",
                entry.domain
            );
            return Ok(());
        };

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        match integration.setup_entry(self, &entry).await {
            Ok(()) => {
                self.transition(entry_id, ConfigEntryState::Loaded, None)?;
                info!("Setup completed for entry: {} ({})", entry.title, entry_id);
                Ok(())
            }
            Err(SetupError::NotReady(reason)) => {
                self.transition(
                    entry_id,
                    ConfigEntryState::SetupRetry,
                    Some(reason.clone()),
                )?;
                let tries = self
                    .entries
                    .get_mut(entry_id)
                    .map(|mut e| e.increment_tries())
                    .unwrap_or(1);
                let delay = calculate_retry_delay(tries - 1);
                warn!(
                    "Config entry {} not ready yet: {}; retrying in {:.1}s",
                    entry_id,
                    reason,
                    delay.as_secs_f64()
                );
                self.schedule_retry(entry_id, delay);
                Err(ConfigEntriesError::NotReady(reason))
            }
            Err(SetupError::Failed(reason)) => {
                warn!("Setup failed for entry {}: {}", entry_id, reason);
                self.transition(
                    entry_id,
                    ConfigEntryState::SetupError,
                    Some(reason.clone()),
                )?;
                Err(ConfigEntriesError::SetupFailed(reason))
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, entry_id: &str, delay: std::time::Duration) {
        let manager: Weak<Self> = Arc::downgrade(self);
        let id = entry_id.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(manager) = manager.upgrade() else {
                return;
            };
            manager.retry_setup(&id).await;
        });

        if let Some(previous) = self.retry_tasks.insert(entry_id.to_string(), handle) {
            previous.abort();
        }
    }

    async fn retry_setup(self: &Arc<Self>, entry_id: &str) {
        let _lock = self.setup_lock.lock().await;
        self.retry_tasks.remove(entry_id);

        // Unloaded or set up by someone else while waiting
        let pending = self
            .get(entry_id)
            .is_some_and(|e| e.state == ConfigEntryState::SetupRetry);
        if !pending {
            return;
        }

        if let Err(err) = self.setup_locked(entry_id).await {
            debug!("Retry of entry {} did not succeed: {}", entry_id, err);
        }
    }

    /// Unload an entry.
    ///
    /// Returns `false` if the integration refused to unload; the entry then
    /// ends in `FailedUnload`.
    pub async fn unload(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<bool> {
        let _lock = self.setup_lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if let Some((_, retry)) = self.retry_tasks.remove(entry_id) {
            retry.abort();
            debug!("Cancelled pending setup retry for entry {}", entry_id);
        }

        match entry.state {
            ConfigEntryState::NotLoaded => return Ok(true),
            state if !state.is_recoverable() => {
                return Err(ConfigEntriesError::CannotUnload(state));
            }
            _ => {}
        }

        let was_loaded = entry.is_loaded();
        self.transition(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        let unloaded = match self.integration(&entry.domain) {
            Some(integration) if was_loaded => integration.unload_entry(self, &entry).await,
            _ => true,
        };

        if unloaded {
            self.transition(entry_id, ConfigEntryState::NotLoaded, None)?;
            info!("Unloaded entry: {} ({})", entry.title, entry_id);
        } else {
            self.transition(
                entry_id,
                ConfigEntryState::FailedUnload,
                Some("Unload failed".to_string()),
            )?;
            warn!("Failed to unload entry: {} ({})", entry.title, entry_id);
        }

        Ok(unloaded)
    }

    /// Reload an entry (unload + setup)
    pub async fn reload(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<()> {
        if !self.unload(entry_id).await? {
            return Err(ConfigEntriesError::UnloadFailed(entry_id.to_string()));
        }
        self.setup(entry_id).await
    }

    /// Forward an entry to entity platforms.
    ///
    /// Spawns one task per platform and returns without waiting for them.
    pub fn forward_entry_setups(
        &self,
        entry: &ConfigEntry,
        platforms: &[Platform],
    ) -> Vec<JoinHandle<()>> {
        platforms
            .iter()
            .map(|&platform| {
                let handler = self.platform(&entry.domain, platform);
                let entry = entry.clone();

                tokio::spawn(async move {
                    let Some(handler) = handler else {
                        debug!(
                            "No {} platform registered for {}",
                            platform, entry.domain
                        );
                        return;
                    };
                    match handler.setup_entry(&entry).await {
                        Ok(()) => debug!(
                            "Set up {}.{} for entry {}",
                            entry.domain, platform, entry.entry_id
                        ),
                        Err(err) => warn!(
                            "Error setting up {}.{} for entry {}: {}",
                            entry.domain, platform, entry.entry_id, err
                        ),
                    }
                })
            })
            .collect()
    }

    /// Unload an entry from one entity platform
    pub async fn forward_entry_unload(&self, entry: &ConfigEntry, platform: Platform) -> bool {
        match self.platform(&entry.domain, platform) {
            Some(handler) => handler.unload_entry(entry).await,
            None => true,
        }
    }

    /// Register a listener invoked whenever `entry_id` is updated
    pub fn add_update_listener(&self, entry_id: &str, listener: UpdateListener) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        self.update_listeners
            .entry(entry_id.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn remove_update_listener(&self, entry_id: &str, id: ListenerId) -> bool {
        let Some(mut listeners) = self.update_listeners.get_mut(entry_id) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        before != listeners.len()
    }

    /// Number of update listeners registered for an entry
    pub fn update_listener_count(&self, entry_id: &str) -> usize {
        self.update_listeners
            .get(entry_id)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    /// Get all entry IDs
    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    /// Get count of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
