//! Roborock cloud collaborators
//!
//! The cloud REST client and the MQTT client live outside this crate. They
//! are blocking; callers run them on the blocking thread pool.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Login payload returned by the Roborock cloud (token, rriot credentials)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserData(pub serde_json::Value);

/// Discovery payload describing the account's homes, devices and products
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HomeData(pub serde_json::Value);

/// Errors raised by the cloud collaborators
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("connection failed: {0}")]
    Connection(String),
}

/// Cloud REST client
pub trait RoborockApi: Send + Sync {
    /// Discover the homes and devices visible to `user_data`
    fn get_home_data(&self, user_data: &UserData) -> Result<HomeData, ApiError>;
}

/// MQTT client for the device fleet
pub trait RoborockMqtt: Send + Sync {
    /// Connect to the broker and subscribe to the devices' topics
    fn connect(&self) -> Result<(), ApiError>;
}

/// Builds the collaborators for one config entry
pub trait ClientFactory: Send + Sync {
    fn api_client(
        &self,
        username: &str,
        device_identifier: &str,
        base_url: &str,
    ) -> Arc<dyn RoborockApi>;

    fn mqtt_client(&self, user_data: &UserData, home_data: &HomeData) -> Arc<dyn RoborockMqtt>;
}
