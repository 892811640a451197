//! Helpers shared by integrations
//!
//! Currently the polling [`DataUpdateCoordinator`].

pub mod update_coordinator;

pub use update_coordinator::{CoordinatorSnapshot, DataUpdateCoordinator, DataUpdater, UpdateFailed};
