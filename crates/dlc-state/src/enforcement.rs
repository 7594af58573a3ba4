//! # Enforcement Categories
//!
//! The policy pipeline does not see machine states directly. It applies one
//! of seven categories, derived from the current pair of states.

use serde::{Deserialize, Serialize};

use crate::device::DeviceState;
use crate::provision::ProvisionState;

/// The restriction set a policy handler must apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementCategory {
    /// Provisioning is running.
    ProvisionInProgress,
    /// Kiosk provisioned, device not yet locked or unlocked by the server.
    Provisioned,
    /// Provisioning postponed by the user.
    ProvisionPaused,
    /// Provisioning failed.
    ProvisionFailed,
    /// Device locked.
    Locked,
    /// Device unlocked, or nothing decided yet.
    Unlocked,
    /// Program finished; every restriction removed.
    Cleared,
}

impl EnforcementCategory {
    /// Every category.
    pub const ALL: [EnforcementCategory; 7] = [
        Self::ProvisionInProgress,
        Self::Provisioned,
        Self::ProvisionPaused,
        Self::ProvisionFailed,
        Self::Locked,
        Self::Unlocked,
        Self::Cleared,
    ];

    /// Derive the category for the current pair of machine states.
    ///
    /// A cleared device overrides everything. Lock state only takes effect
    /// once provisioning has succeeded; before that the provisioning state
    /// decides, and an unprovisioned device is unlocked.
    pub fn derive(provision: ProvisionState, device: DeviceState) -> Self {
        if device == DeviceState::Cleared {
            return Self::Cleared;
        }
        match provision {
            ProvisionState::Unprovisioned => Self::Unlocked,
            ProvisionState::ProvisionInProgress => Self::ProvisionInProgress,
            ProvisionState::ProvisionPaused => Self::ProvisionPaused,
            ProvisionState::ProvisionFailed => Self::ProvisionFailed,
            ProvisionState::KioskProvisioned => Self::Provisioned,
            ProvisionState::ProvisionSucceeded => match device {
                DeviceState::Locked | DeviceState::PseudoLocked => Self::Locked,
                DeviceState::Unlocked | DeviceState::PseudoUnlocked | DeviceState::Unprovisioned => {
                    Self::Unlocked
                }
                DeviceState::SetupInProgress
                | DeviceState::SetupSucceeded
                | DeviceState::SetupFailed
                | DeviceState::KioskSetup => Self::Provisioned,
                DeviceState::Cleared => Self::Cleared,
            },
        }
    }

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProvisionInProgress => "provision_in_progress",
            Self::Provisioned => "provisioned",
            Self::ProvisionPaused => "provision_paused",
            Self::ProvisionFailed => "provision_failed",
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
            Self::Cleared => "cleared",
        }
    }
}

impl std::fmt::Display for EnforcementCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
