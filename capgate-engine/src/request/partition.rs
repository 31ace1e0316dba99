//! Splitting a raw request into ordinary capabilities and special groups
//!
//! Special groups are recognized by identifier. Whether a recognized
//! capability gets its own task, rides along with the ordinary round, is
//! granted without asking, or is unrequestable depends on the
//! [`PlatformFacts`] only; no platform call is made here.

use capgate_api::{permission, version_codes, Capability, PlatformFacts};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::event::RequestCode;

/// A specially-gated capability group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialGroup {
    BackgroundLocation,
    Overlay,
    WriteSettings,
    ManageStorage,
    InstallPackages,
    Notifications,
    BodySensorsBackground,
}

/// Order in which special-group tasks follow the ordinary task
pub const CHAIN_ORDER: [SpecialGroup; 7] = [
    SpecialGroup::BackgroundLocation,
    SpecialGroup::Overlay,
    SpecialGroup::WriteSettings,
    SpecialGroup::ManageStorage,
    SpecialGroup::InstallPackages,
    SpecialGroup::Notifications,
    SpecialGroup::BodySensorsBackground,
];

/// Where the partitioner sends a recognized capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// Its own task in the chain
    Dedicated,
    /// Requested together with the ordinary capabilities
    Ordinary,
    /// Implicitly granted on this platform
    AutoGranted,
    /// Cannot be granted here; never asked
    Unrequestable,
}

/// How a refusal inside a group is classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalClass {
    /// Ask the gateway whether a rationale may be shown
    Rationale,
    /// Settings-screen grants have no "never ask again"; always soft
    SoftOnly,
}

impl SpecialGroup {
    /// Identifier of the capability that forms this group
    pub fn capability_id(self) -> &'static str {
        match self {
            Self::BackgroundLocation => permission::ACCESS_BACKGROUND_LOCATION,
            Self::Overlay => permission::SYSTEM_ALERT_WINDOW,
            Self::WriteSettings => permission::WRITE_SETTINGS,
            Self::ManageStorage => permission::MANAGE_EXTERNAL_STORAGE,
            Self::InstallPackages => permission::REQUEST_INSTALL_PACKAGES,
            Self::Notifications => permission::POST_NOTIFICATIONS,
            Self::BodySensorsBackground => permission::BODY_SENSORS_BACKGROUND,
        }
    }

    pub fn capability(self) -> Capability {
        Capability::from(self.capability_id())
    }

    /// Recognize a special capability by identifier
    pub fn from_capability(capability: &Capability) -> Option<Self> {
        CHAIN_ORDER
            .into_iter()
            .find(|group| group.capability_id() == capability.as_str())
    }

    /// Request code of this group's grant round
    pub fn request_code(self) -> RequestCode {
        match self {
            Self::BackgroundLocation => RequestCode::BackgroundLocation,
            Self::Overlay => RequestCode::Overlay,
            Self::WriteSettings => RequestCode::WriteSettings,
            Self::ManageStorage => RequestCode::ManageStorage,
            Self::InstallPackages => RequestCode::InstallPackages,
            Self::Notifications => RequestCode::Notifications,
            Self::BodySensorsBackground => RequestCode::BodySensorsBackground,
        }
    }

    /// Route the group's capability for the given platform
    pub fn routing(self, facts: &PlatformFacts) -> Routing {
        match self {
            Self::BackgroundLocation => {
                if facts.both_at_least(version_codes::R) {
                    Routing::Dedicated
                } else if facts.os_version >= version_codes::Q {
                    Routing::Ordinary
                } else {
                    Routing::Unrequestable
                }
            }
            Self::Overlay | Self::WriteSettings => {
                if facts.both_at_least(version_codes::M) {
                    Routing::Dedicated
                } else {
                    Routing::AutoGranted
                }
            }
            Self::ManageStorage => {
                if facts.os_version >= version_codes::R {
                    Routing::Dedicated
                } else {
                    Routing::Unrequestable
                }
            }
            Self::InstallPackages => {
                if facts.both_at_least(version_codes::O) {
                    Routing::Dedicated
                } else {
                    Routing::Unrequestable
                }
            }
            Self::Notifications => {
                if facts.os_version >= version_codes::O {
                    Routing::Dedicated
                } else {
                    Routing::AutoGranted
                }
            }
            Self::BodySensorsBackground => {
                if facts.os_version >= version_codes::TIRAMISU {
                    Routing::Dedicated
                } else {
                    Routing::Unrequestable
                }
            }
        }
    }

    /// Capabilities of which at least one must already be granted
    ///
    /// Empty when the group has no prerequisite.
    pub fn prerequisites(self) -> &'static [&'static str] {
        match self {
            Self::BackgroundLocation => &[
                permission::ACCESS_FINE_LOCATION,
                permission::ACCESS_COARSE_LOCATION,
            ],
            Self::BodySensorsBackground => &[permission::BODY_SENSORS],
            _ => &[],
        }
    }

    pub fn refusal(self) -> RefusalClass {
        match self {
            Self::BackgroundLocation | Self::BodySensorsBackground => RefusalClass::Rationale,
            _ => RefusalClass::SoftOnly,
        }
    }
}

impl fmt::Display for SpecialGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BackgroundLocation => "background_location",
            Self::Overlay => "overlay",
            Self::WriteSettings => "write_settings",
            Self::ManageStorage => "manage_storage",
            Self::InstallPackages => "install_packages",
            Self::Notifications => "notifications",
            Self::BodySensorsBackground => "body_sensors_background",
        };
        f.write_str(name)
    }
}

/// Result of partitioning a requested capability set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Partition {
    /// Capabilities requested in the ordinary round
    pub ordinary: BTreeSet<Capability>,
    /// Special groups that get a dedicated task, in chain order
    pub special: BTreeSet<SpecialGroup>,
    /// Capabilities granted without asking on this platform
    pub auto_granted: BTreeSet<Capability>,
    /// Capabilities that cannot be requested on this platform
    pub unrequestable: BTreeSet<Capability>,
}

impl Partition {
    /// Every capability in the partition (the deduplicated input)
    pub fn all(&self) -> BTreeSet<Capability> {
        let mut all = self.ordinary.clone();
        all.extend(self.special.iter().map(|g| g.capability()));
        all.extend(self.auto_granted.iter().cloned());
        all.extend(self.unrequestable.iter().cloned());
        all
    }

    pub fn is_empty(&self) -> bool {
        self.ordinary.is_empty()
            && self.special.is_empty()
            && self.auto_granted.is_empty()
            && self.unrequestable.is_empty()
    }
}

/// Partition `requested` for the given platform facts
pub fn partition<I>(requested: I, facts: &PlatformFacts) -> Partition
where
    I: IntoIterator<Item = Capability>,
{
    let mut out = Partition::default();
    for capability in requested {
        let Some(group) = SpecialGroup::from_capability(&capability) else {
            out.ordinary.insert(capability);
            continue;
        };
        match group.routing(facts) {
            Routing::Dedicated => {
                out.special.insert(group);
            }
            Routing::Ordinary => {
                out.ordinary.insert(capability);
            }
            Routing::AutoGranted => {
                out.auto_granted.insert(capability);
            }
            Routing::Unrequestable => {
                out.unrequestable.insert(capability);
            }
        }
    }
    out
}
