//! Integration and platform hooks
//!
//! Defines the interface the config entries manager drives. Integrations
//! implement [`Integration`]; entity platforms implement [`EntityPlatform`]
//! and receive the entries an integration forwards to them.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::entry::ConfigEntry;
use crate::manager::ConfigEntries;

/// Why an integration could not set up an entry
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    /// Transient condition (device offline, cloud unreachable); the manager
    /// schedules a retry.
    #[error("config entry not ready: {0}")]
    NotReady(String),

    /// Permanent failure; the entry stays in `SetupError` until reloaded.
    #[error("config entry setup failed: {0}")]
    Failed(String),
}

/// Lifecycle hooks of an integration
#[async_trait]
pub trait Integration: Send + Sync {
    /// Integration domain (e.g., "roborock")
    fn domain(&self) -> &str;

    /// Set up one config entry.
    async fn setup_entry(
        &self,
        entries: &Arc<ConfigEntries>,
        entry: &ConfigEntry,
    ) -> Result<(), SetupError>;

    /// Tear down one config entry. Returns `false` if anything refused to unload.
    async fn unload_entry(&self, entries: &Arc<ConfigEntries>, entry: &ConfigEntry) -> bool;
}

/// Entity platform of one integration (e.g. the roborock `vacuum` platform)
#[async_trait]
pub trait EntityPlatform: Send + Sync {
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), String>;

    async fn unload_entry(&self, entry: &ConfigEntry) -> bool;
}

/// Called with the updated entry whenever an entry's data or options change
pub type UpdateListener = Arc<dyn Fn(ConfigEntry) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle returned by [`ConfigEntries::add_update_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);
