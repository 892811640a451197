//! Roborock integration
//!
//! Connects a Roborock cloud account to the host: reads the stored
//! credentials from the config entry, reuses or fetches the account's home
//! data, and keeps an MQTT session to the device fleet alive with a polling
//! coordinator. Entity platforms read connection state from that
//! coordinator.
//!
//! The cloud and MQTT clients themselves are supplied by the embedder
//! through [`ClientFactory`].
//!
//! ```ignore
//! let integration = Arc::new(RoborockIntegration::new(factory));
//! entries.register_integration(integration.clone());
//! entries.setup(&entry_id).await?;
//! ```

pub mod api;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod integration;
pub mod registry;

pub use api::{ApiError, ClientFactory, HomeData, RoborockApi, RoborockMqtt, UserData};
pub use config::EntryConfig;
pub use constants::{DOMAIN, PLATFORMS, SCAN_INTERVAL};
pub use coordinator::{ConnectionEvent, ConnectionState, RoborockDataUpdateCoordinator};
pub use error::{RoborockError, RoborockResult};
pub use integration::RoborockIntegration;
pub use registry::CoordinatorRegistry;
