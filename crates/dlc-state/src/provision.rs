//! # Provisioning State Machine
//!
//! ```text
//! Unprovisioned ──▶ ProvisionInProgress ──▶ KioskProvisioned ──▶ ProvisionSucceeded
//!                     │   ▲        │   ▲            │
//!             Pause   │   │Resume  │   │ Retry      │ Failure
//!                     ▼   │        ▼   │            │
//!               ProvisionPaused   ProvisionFailed ◀─┘
//! ```
//!
//! There are no self-loops: two racing callers delivering the same event
//! see one success and one rejection.

use serde::{Deserialize, Serialize};

use crate::error::TransitionRejected;

/// Provisioning lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisionState {
    /// Not provisioned.
    Unprovisioned,
    /// Provisioning is running.
    ProvisionInProgress,
    /// The user postponed provisioning.
    ProvisionPaused,
    /// Provisioning failed; the failure flow is stepping toward a reset.
    ProvisionFailed,
    /// The kiosk app is installed and configured.
    KioskProvisioned,
    /// Provisioning finished (final).
    ProvisionSucceeded,
}

impl ProvisionState {
    /// Every state, in persisted-code order.
    pub const ALL: [ProvisionState; 6] = [
        Self::Unprovisioned,
        Self::ProvisionInProgress,
        Self::ProvisionPaused,
        Self::ProvisionFailed,
        Self::KioskProvisioned,
        Self::ProvisionSucceeded,
    ];

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unprovisioned => "UNPROVISIONED",
            Self::ProvisionInProgress => "PROVISION_IN_PROGRESS",
            Self::ProvisionPaused => "PROVISION_PAUSED",
            Self::ProvisionFailed => "PROVISION_FAILED",
            Self::KioskProvisioned => "KIOSK_PROVISIONED",
            Self::ProvisionSucceeded => "PROVISION_SUCCEEDED",
        }
    }

    /// Parse a canonical name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }

    /// Whether no event leaves this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ProvisionSucceeded)
    }

    /// Whether the kiosk has been provisioned on this device.
    pub fn is_provisioned(&self) -> bool {
        matches!(self, Self::KioskProvisioned | Self::ProvisionSucceeded)
    }

    /// Apply `event` to this state according to the fixed transition table.
    pub fn next(self, event: ProvisionEvent) -> Result<ProvisionState, TransitionRejected> {
        use ProvisionEvent as E;
        use ProvisionState as S;

        let next = match (self, event) {
            (S::Unprovisioned, E::ProvisionReady) => S::ProvisionInProgress,
            (S::ProvisionInProgress, E::ProvisionKiosk) => S::KioskProvisioned,
            (S::ProvisionInProgress, E::ProvisionPause) => S::ProvisionPaused,
            (S::ProvisionInProgress | S::KioskProvisioned, E::ProvisionFailure) => {
                S::ProvisionFailed
            }
            (S::ProvisionPaused, E::ProvisionResume) => S::ProvisionInProgress,
            (S::ProvisionFailed, E::ProvisionRetry) => S::ProvisionInProgress,
            (S::KioskProvisioned, E::ProvisionSuccess) => S::ProvisionSucceeded,
            (state, event) => return Err(TransitionRejected::new("provision", state, event)),
        };
        Ok(next)
    }

    /// Every event this state accepts.
    pub fn accepted_events(&self) -> Vec<ProvisionEvent> {
        ProvisionEvent::ALL
            .into_iter()
            .filter(|e| self.next(*e).is_ok())
            .collect()
    }
}

impl std::fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive the provisioning state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisionEvent {
    /// Provisioning data arrived from check-in.
    ProvisionReady,
    /// Retry a failed provisioning.
    ProvisionRetry,
    /// The kiosk app is ready.
    ProvisionKiosk,
    /// Provisioning failed.
    ProvisionFailure,
    /// The user postponed provisioning.
    ProvisionPause,
    /// Resume postponed provisioning.
    ProvisionResume,
    /// Provisioning finished.
    ProvisionSuccess,
}

impl ProvisionEvent {
    /// Every event.
    pub const ALL: [ProvisionEvent; 7] = [
        Self::ProvisionReady,
        Self::ProvisionRetry,
        Self::ProvisionKiosk,
        Self::ProvisionFailure,
        Self::ProvisionPause,
        Self::ProvisionResume,
        Self::ProvisionSuccess,
    ];

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProvisionReady => "PROVISION_READY",
            Self::ProvisionRetry => "PROVISION_RETRY",
            Self::ProvisionKiosk => "PROVISION_KIOSK",
            Self::ProvisionFailure => "PROVISION_FAILURE",
            Self::ProvisionPause => "PROVISION_PAUSE",
            Self::ProvisionResume => "PROVISION_RESUME",
            Self::ProvisionSuccess => "PROVISION_SUCCESS",
        }
    }

    /// Parse a canonical name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for ProvisionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
