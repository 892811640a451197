//! Entity platforms an integration can forward a config entry to

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when parsing an unknown platform name
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(pub String);

/// A host-defined entity category (e.g. `vacuum`, `sensor`)
///
/// Integrations forward their config entries to one or more platforms,
/// which create the actual entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    BinarySensor,
    Button,
    Camera,
    Image,
    Number,
    Select,
    Sensor,
    Switch,
    Time,
    Vacuum,
}

impl Platform {
    /// The platform name as used in option keys and entity ids
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::BinarySensor => "binary_sensor",
            Platform::Button => "button",
            Platform::Camera => "camera",
            Platform::Image => "image",
            Platform::Number => "number",
            Platform::Select => "select",
            Platform::Sensor => "sensor",
            Platform::Switch => "switch",
            Platform::Time => "time",
            Platform::Vacuum => "vacuum",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let platform = match s {
            "binary_sensor" => Platform::BinarySensor,
            "button" => Platform::Button,
            "camera" => Platform::Camera,
            "image" => Platform::Image,
            "number" => Platform::Number,
            "select" => Platform::Select,
            "sensor" => Platform::Sensor,
            "switch" => Platform::Switch,
            "time" => Platform::Time,
            "vacuum" => Platform::Vacuum,
            other => return Err(UnknownPlatform(other.to_string())),
        };
        Ok(platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_str_roundtrip() {
        for platform in [Platform::Vacuum, Platform::Sensor, Platform::BinarySensor] {
            assert_eq!(platform.as_str().parse::<Platform>(), Ok(platform));
        }
    }

    #[test]
    fn test_unknown_platform() {
        let err = "toaster".parse::<Platform>().unwrap_err();
        assert_eq!(err, UnknownPlatform("toaster".to_string()));
        assert_eq!(err.to_string(), "unknown platform: toaster");
    }

    #[test]
    fn test_platform_serde_matches_display() {
        let json = serde_json::to_string(&Platform::BinarySensor).unwrap();
        assert_eq!(json, "\"binary_sensor\"");
        assert_eq!(Platform::BinarySensor.to_string(), "binary_sensor");
    }
}
