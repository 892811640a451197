//! Setup, unload and reload of Roborock config entries

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use ha_config_entries::{ConfigEntries, ConfigEntry, Integration, SetupError, UpdateListener};
use tracing::{debug, info, warn};

use crate::api::{ClientFactory, HomeData};
use crate::config::EntryConfig;
use crate::constants::DOMAIN;
use crate::coordinator::RoborockDataUpdateCoordinator;
use crate::error::RoborockResult;
use crate::registry::CoordinatorRegistry;

/// The Roborock integration.
///
/// Owns the coordinators of every loaded Roborock entry. Cloning is cheap
/// and clones share the registry.
#[derive(Clone)]
pub struct RoborockIntegration {
    factory: Arc<dyn ClientFactory>,
    registry: Arc<CoordinatorRegistry>,
}

impl RoborockIntegration {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            registry: Arc::new(CoordinatorRegistry::new()),
        }
    }

    pub fn registry(&self) -> &CoordinatorRegistry {
        &self.registry
    }

    pub fn coordinator(&self, entry_id: &str) -> Option<Arc<RoborockDataUpdateCoordinator>> {
        self.registry.get(entry_id)
    }

    /// Unload then set up again.
    ///
    /// The unload result is ignored: a failed unload leaves the old
    /// coordinator registered and setup replaces it.
    pub async fn reload_entry(
        &self,
        entries: &Arc<ConfigEntries>,
        entry: &ConfigEntry,
    ) -> Result<(), SetupError> {
        self.unload_entry(entries, entry).await;
        self.setup_entry(entries, entry).await
    }

    /// Cached home data, or one discovery call on the blocking pool
    async fn resolve_home_data(&self, config: &EntryConfig) -> RoborockResult<HomeData> {
        if let Some(home_data) = &config.home_data {
            return Ok(home_data.clone());
        }

        let params = config.discovery_params()?;
        let api = self
            .factory
            .api_client(params.username, params.device_identifier, params.base_url);
        let user_data = config.user_data.clone();

        debug!("Fetching roborock home data");
        let home_data = tokio::task::spawn_blocking(move || api.get_home_data(&user_data)).await??;
        Ok(home_data)
    }

    /// Stop a coordinator that is leaving the registry
    fn release(&self, entries: &ConfigEntries, coordinator: &RoborockDataUpdateCoordinator) {
        coordinator.shutdown();
        if let Some(listener) = coordinator.update_listener() {
            entries.remove_update_listener(coordinator.entry_id(), listener);
        }
    }

    /// Reload the entry whenever its options change.
    ///
    /// The reload goes through [`reload_entry`](Self::reload_entry), not the
    /// manager, so the entry's manager state is left as it was. If the new
    /// setup fails the entry still reads `Loaded` while no coordinator is
    /// registered and no setup retry is scheduled; a manual reload through
    /// the manager recovers it.
    fn reload_listener(&self, entries: &Arc<ConfigEntries>) -> UpdateListener {
        let integration = self.clone();
        let entries = Arc::downgrade(entries);

        Arc::new(move |entry: ConfigEntry| -> BoxFuture<'static, ()> {
            let integration = integration.clone();
            let entries = entries.clone();
            Box::pin(async move {
                let Some(entries) = entries.upgrade() else {
                    return;
                };
                debug!("Reloading roborock entry {} after update", entry.entry_id);
                if let Err(err) = integration.reload_entry(&entries, &entry).await {
                    warn!("Reload of roborock entry {} failed: {}", entry.entry_id, err);
                }
            })
        })
    }
}

#[async_trait]
impl Integration for RoborockIntegration {
    fn domain(&self) -> &str {
        DOMAIN
    }

    async fn setup_entry(
        &self,
        entries: &Arc<ConfigEntries>,
        entry: &ConfigEntry,
    ) -> Result<(), SetupError> {
        debug!("Setting up roborock entry {} ({})", entry.entry_id, entry.title);

        let config = EntryConfig::from_entry(entry)?;
        let home_data = self.resolve_home_data(&config).await?;

        let mqtt = self.factory.mqtt_client(&config.user_data, &home_data);
        let mut coordinator = RoborockDataUpdateCoordinator::new(&entry.entry_id, mqtt);

        debug!("Searching for Roborock sensors...");
        coordinator.refresh().await;

        if !coordinator.last_update_success() {
            let reason = coordinator
                .last_error()
                .map(|err| err.to_string())
                .unwrap_or_else(|| "first refresh failed".to_string());
            return Err(SetupError::NotReady(reason));
        }

        coordinator.set_platforms(config.platforms);
        let listener = entries.add_update_listener(&entry.entry_id, self.reload_listener(entries));
        coordinator.set_update_listener(listener);

        let coordinator = Arc::new(coordinator);
        if let Some(previous) = self.registry.insert(Arc::clone(&coordinator)) {
            warn!(
                "Replacing roborock coordinator still registered for entry {}",
                entry.entry_id
            );
            self.release(entries, &previous);
        }

        entries.forward_entry_setups(entry, coordinator.platforms());
        coordinator.start();

        info!(
            "Roborock entry {} connected, platforms: {:?}",
            entry.entry_id,
            coordinator.platforms()
        );
        Ok(())
    }

    async fn unload_entry(&self, entries: &Arc<ConfigEntries>, entry: &ConfigEntry) -> bool {
        let Some(coordinator) = self.registry.get(&entry.entry_id) else {
            debug!("No roborock coordinator registered for entry {}", entry.entry_id);
            return true;
        };

        let results = join_all(
            coordinator
                .platforms()
                .iter()
                .map(|&platform| entries.forward_entry_unload(entry, platform)),
        )
        .await;

        let unloaded = results.into_iter().all(|ok| ok);
        if unloaded {
            if let Some(coordinator) = self.registry.remove(&entry.entry_id) {
                self.release(entries, &coordinator);
            }
        } else {
            // Coordinator stays registered; the entry is left half unloaded
            warn!(
                "Failed to unload all platforms of roborock entry {}",
                entry.entry_id
            );
        }

        unloaded
    }
}
