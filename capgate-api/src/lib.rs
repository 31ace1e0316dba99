//! capgate-api: Shared types for the capgate capability-request engine
//!
//! This crate defines the vocabulary spoken between the engine and the
//! platform it runs on: capability identifiers, classification states,
//! version facts and the terminal outcome of a request run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// API version for compatibility checking
pub const API_VERSION: u32 = 1;

/// Platform version number (e.g. an SDK level)
pub type VersionCode = u32;

/// Version thresholds that gate the specially-handled capability groups
pub mod version_codes {
    use super::VersionCode;

    /// Runtime permissions and settings-screen grants introduced
    pub const M: VersionCode = 23;
    /// Install-from-unknown-sources and notification settings screens
    pub const O: VersionCode = 26;
    /// Background location introduced as a separate capability
    pub const Q: VersionCode = 29;
    /// Background location requested on its own; all-files access
    pub const R: VersionCode = 30;
    /// Background body sensors
    pub const TIRAMISU: VersionCode = 33;
}

/// Well-known capability identifiers
pub mod permission {
    pub const ACCESS_FINE_LOCATION: &str = "android.permission.ACCESS_FINE_LOCATION";
    pub const ACCESS_COARSE_LOCATION: &str = "android.permission.ACCESS_COARSE_LOCATION";
    pub const ACCESS_BACKGROUND_LOCATION: &str = "android.permission.ACCESS_BACKGROUND_LOCATION";
    pub const SYSTEM_ALERT_WINDOW: &str = "android.permission.SYSTEM_ALERT_WINDOW";
    pub const WRITE_SETTINGS: &str = "android.permission.WRITE_SETTINGS";
    pub const MANAGE_EXTERNAL_STORAGE: &str = "android.permission.MANAGE_EXTERNAL_STORAGE";
    pub const REQUEST_INSTALL_PACKAGES: &str = "android.permission.REQUEST_INSTALL_PACKAGES";
    pub const POST_NOTIFICATIONS: &str = "android.permission.POST_NOTIFICATIONS";
    pub const BODY_SENSORS: &str = "android.permission.BODY_SENSORS";
    pub const BODY_SENSORS_BACKGROUND: &str = "android.permission.BODY_SENSORS_BACKGROUND";
    pub const CAMERA: &str = "android.permission.CAMERA";
    pub const RECORD_AUDIO: &str = "android.permission.RECORD_AUDIO";
    pub const READ_CONTACTS: &str = "android.permission.READ_CONTACTS";
    pub const CALL_PHONE: &str = "android.permission.CALL_PHONE";
    pub const READ_EXTERNAL_STORAGE: &str = "android.permission.READ_EXTERNAL_STORAGE";
}

/// Identifier of a protected operation
///
/// Capabilities compare by value. Any string is accepted; the engine only
/// attaches special meaning to the identifiers in [`permission`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    /// Create a capability from its identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier without the `android.permission.` style namespace prefix
    pub fn short_name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Capability {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for Capability {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for Capability {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Classification of a capability at the end of (or during) a request run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityState {
    /// Granted by the platform
    Granted,
    /// Refused, but the rationale may still be shown and the request retried
    Denied,
    /// Refused with future rationale disabled; only settings can recover it
    PermanentlyDenied,
    /// Cannot be granted on this OS/target-version combination; never asked
    Unrequestable,
}

impl CapabilityState {
    /// Whether the state counts as denied in the final result
    pub fn is_denied(&self) -> bool {
        !matches!(self, Self::Granted)
    }
}

/// OS and target version facts the partitioner decides on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformFacts {
    /// Version of the running OS
    pub os_version: VersionCode,
    /// Version the application targets
    pub target_version: VersionCode,
}

impl PlatformFacts {
    /// Create platform facts
    pub fn new(os_version: VersionCode, target_version: VersionCode) -> Self {
        Self {
            os_version,
            target_version,
        }
    }

    /// Both the OS and the target version reach `min`
    pub fn both_at_least(&self, min: VersionCode) -> bool {
        self.os_version >= min && self.target_version >= min
    }
}

/// Terminal result of one request run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOutcome {
    /// True when nothing was denied
    pub all_granted: bool,
    /// Granted capabilities
    pub granted: Vec<Capability>,
    /// Denied, permanently denied and unrequestable capabilities
    pub denied: Vec<Capability>,
}

impl RequestOutcome {
    /// Build an outcome; `all_granted` is derived from `denied`
    pub fn new(granted: Vec<Capability>, denied: Vec<Capability>) -> Self {
        Self {
            all_granted: denied.is_empty(),
            granted,
            denied,
        }
    }
}

/// Stable fingerprint of a set of capabilities
///
/// Order and duplicates do not affect the result.
pub fn compute_hash<'a>(capabilities: impl IntoIterator<Item = &'a Capability>) -> String {
    let unique: BTreeSet<&str> = capabilities.into_iter().map(|c| c.as_str()).collect();
    let mut hasher = blake3::Hasher::new();
    for id in unique {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex()[..16].to_string()
}
