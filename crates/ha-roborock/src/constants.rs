//! Constants for the Roborock integration

use std::time::Duration;

use ha_core::Platform;

/// Integration domain
pub const DOMAIN: &str = "roborock";

/// Platforms an entry is forwarded to, unless disabled in the entry options
pub const PLATFORMS: &[Platform] = &[Platform::Vacuum, Platform::Sensor];

/// Interval between connection checks
pub const SCAN_INTERVAL: Duration = Duration::from_secs(30);

/// Entry data key: account e-mail
pub const CONF_ENTRY_USERNAME: &str = "username";
/// Entry data key: login payload returned by the cloud
pub const CONF_USER_DATA: &str = "user_data";
/// Entry data key: cached discovery result
pub const CONF_HOME_DATA: &str = "home_data";
/// Entry data key: regional cloud API url
pub const CONF_BASE_URL: &str = "base_url";
