//! Typed view of a Roborock config entry

use ha_config_entries::ConfigEntry;
use ha_core::Platform;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::api::{HomeData, UserData};
use crate::constants::{
    CONF_BASE_URL, CONF_ENTRY_USERNAME, CONF_HOME_DATA, CONF_USER_DATA, PLATFORMS,
};
use crate::error::{RoborockError, RoborockResult};

/// Everything setup needs from a config entry
#[derive(Debug, Clone, PartialEq)]
pub struct EntryConfig {
    pub user_data: UserData,
    /// Cached discovery result; `None` means discover on setup
    pub home_data: Option<HomeData>,
    pub base_url: Option<String>,
    pub username: Option<String>,
    /// The entry's unique id, sent to the cloud as the client identifier
    pub device_identifier: Option<String>,
    /// Platforms enabled in the entry options, in [`PLATFORMS`] order
    pub platforms: Vec<Platform>,
}

/// Arguments of the discovery client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryParams<'a> {
    pub username: &'a str,
    pub device_identifier: &'a str,
    pub base_url: &'a str,
}

impl EntryConfig {
    pub fn from_entry(entry: &ConfigEntry) -> RoborockResult<Self> {
        let user_data = match entry.data.get(CONF_USER_DATA) {
            Some(value) if !value.is_null() => UserData(value.clone()),
            _ => {
                return Err(RoborockError::InvalidEntry(format!(
                    "missing {CONF_USER_DATA}"
                )))
            }
        };

        // An empty object is as good as no cache
        let home_data = entry
            .data
            .get(CONF_HOME_DATA)
            .filter(|value| is_truthy(value))
            .map(|value| HomeData(value.clone()));

        let platforms = PLATFORMS
            .iter()
            .copied()
            .filter(|platform| {
                entry
                    .options
                    .get(platform.as_str())
                    .map_or(true, is_truthy)
            })
            .collect();

        Ok(Self {
            user_data,
            home_data,
            base_url: optional(entry, CONF_BASE_URL)?,
            username: optional(entry, CONF_ENTRY_USERNAME)?,
            device_identifier: entry.unique_id.clone(),
            platforms,
        })
    }

    /// Discovery needs username, unique id and base url
    pub fn discovery_params(&self) -> RoborockResult<DiscoveryParams<'_>> {
        let missing = |key: &str| RoborockError::InvalidEntry(format!("missing {key}"));

        Ok(DiscoveryParams {
            username: self
                .username
                .as_deref()
                .ok_or_else(|| missing(CONF_ENTRY_USERNAME))?,
            device_identifier: self
                .device_identifier
                .as_deref()
                .ok_or_else(|| missing("unique_id"))?,
            base_url: self
                .base_url
                .as_deref()
                .ok_or_else(|| missing(CONF_BASE_URL))?,
        })
    }
}

fn optional<T: DeserializeOwned>(entry: &ConfigEntry, key: &str) -> RoborockResult<Option<T>> {
    match entry.data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|err| RoborockError::InvalidEntry(format!("{key}: {err}"))),
    }
}

/// Whether an option/data value counts as set
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
