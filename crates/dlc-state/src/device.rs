//! # Device Lock State Machine
//!
//! ```text
//!                 ┌─▶ PseudoLocked ◀─▶ PseudoUnlocked ─┐
//!                 │         │                 │        │
//! Unprovisioned ──┼─────────┴──── ProvisioningSuccess ─┴──▶ SetupInProgress
//!                                                             │        │
//!                                                 SetupSucceeded    SetupFailed
//!                                                             │
//!                                                         KioskSetup
//!                                                             │
//!                                              Locked ◀──────▶ Unlocked
//!                                                  └──▶ Cleared ◀──┘   (terminal)
//! ```
//!
//! `Pseudo*` states record lock/unlock requests that arrive before
//! provisioning completes; they never engage lock-task mode.
//!
//! Self-loops (`LockDevice` on `Locked`, `Clear` on `Cleared`, ...) are table
//! entries that return the current state. Callers treat them as coalesced
//! successes with no commit and no enforcement.

use serde::{Deserialize, Serialize};

use crate::error::TransitionRejected;

/// Lock lifecycle state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    /// Nothing has happened yet.
    Unprovisioned,
    /// Provisioning succeeded; device setup is running.
    SetupInProgress,
    /// Device setup finished successfully.
    SetupSucceeded,
    /// Device setup failed.
    SetupFailed,
    /// Setup completed and the kiosk app is in place.
    KioskSetup,
    /// Device is locked.
    Locked,
    /// Device is unlocked.
    Unlocked,
    /// Lock requested before provisioning completed.
    PseudoLocked,
    /// Unlock requested before provisioning completed.
    PseudoUnlocked,
    /// Program finished; all restrictions removed (terminal).
    Cleared,
}

impl DeviceState {
    /// Every state, in persisted-code order.
    pub const ALL: [DeviceState; 10] = [
        Self::Unprovisioned,
        Self::SetupInProgress,
        Self::SetupSucceeded,
        Self::SetupFailed,
        Self::KioskSetup,
        Self::Locked,
        Self::Unlocked,
        Self::PseudoLocked,
        Self::PseudoUnlocked,
        Self::Cleared,
    ];

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unprovisioned => "UNPROVISIONED",
            Self::SetupInProgress => "SETUP_IN_PROGRESS",
            Self::SetupSucceeded => "SETUP_SUCCEEDED",
            Self::SetupFailed => "SETUP_FAILED",
            Self::KioskSetup => "KIOSK_SETUP",
            Self::Locked => "LOCKED",
            Self::Unlocked => "UNLOCKED",
            Self::PseudoLocked => "PSEUDO_LOCKED",
            Self::PseudoUnlocked => "PSEUDO_UNLOCKED",
            Self::Cleared => "CLEARED",
        }
    }

    /// Parse a canonical name. Returns `None` for anything else.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }

    /// Whether no further event changes this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cleared)
    }

    /// Lock view of the state. Everything that is not explicitly locked is
    /// unlocked.
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked | Self::PseudoLocked)
    }

    /// Apply `event` to this state according to the fixed transition table.
    pub fn next(self, event: DeviceEvent) -> Result<DeviceState, TransitionRejected> {
        use DeviceEvent as E;
        use DeviceState as S;

        let next = match (self, event) {
            (S::Unprovisioned | S::PseudoLocked | S::PseudoUnlocked, E::ProvisioningSuccess) => {
                S::SetupInProgress
            }
            (S::Unprovisioned | S::PseudoLocked | S::PseudoUnlocked, E::LockDevice) => {
                S::PseudoLocked
            }
            (S::Unprovisioned | S::PseudoLocked | S::PseudoUnlocked, E::UnlockDevice) => {
                S::PseudoUnlocked
            }
            (S::PseudoLocked | S::PseudoUnlocked, E::Clear) => S::Cleared,
            (S::SetupInProgress, E::SetupSuccess) => S::SetupSucceeded,
            (S::SetupInProgress, E::SetupFailure) => S::SetupFailed,
            (S::SetupSucceeded, E::SetupComplete) => S::KioskSetup,
            (S::KioskSetup | S::Locked | S::Unlocked, E::LockDevice) => S::Locked,
            (S::KioskSetup | S::Locked | S::Unlocked, E::UnlockDevice) => S::Unlocked,
            (S::KioskSetup | S::Locked | S::Unlocked, E::Clear) => S::Cleared,
            (S::Cleared, E::Clear) => S::Cleared,
            (state, event) => return Err(TransitionRejected::new("device", state, event)),
        };
        Ok(next)
    }

    /// Every event this state accepts, including coalesced self-loops.
    pub fn accepted_events(&self) -> Vec<DeviceEvent> {
        DeviceEvent::ALL
            .into_iter()
            .filter(|e| self.next(*e).is_ok())
            .collect()
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive the device lock state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceEvent {
    /// Provisioning completed; start device setup.
    ProvisioningSuccess,
    /// Device setup succeeded.
    SetupSuccess,
    /// Device setup failed.
    SetupFailure,
    /// The user finished the setup flow.
    SetupComplete,
    /// Lock the device.
    LockDevice,
    /// Unlock the device.
    UnlockDevice,
    /// End the program and remove all restrictions.
    Clear,
}

impl DeviceEvent {
    /// Every event.
    pub const ALL: [DeviceEvent; 7] = [
        Self::ProvisioningSuccess,
        Self::SetupSuccess,
        Self::SetupFailure,
        Self::SetupComplete,
        Self::LockDevice,
        Self::UnlockDevice,
        Self::Clear,
    ];

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProvisioningSuccess => "PROVISIONING_SUCCESS",
            Self::SetupSuccess => "SETUP_SUCCESS",
            Self::SetupFailure => "SETUP_FAILURE",
            Self::SetupComplete => "SETUP_COMPLETE",
            Self::LockDevice => "LOCK_DEVICE",
            Self::UnlockDevice => "UNLOCK_DEVICE",
            Self::Clear => "CLEAR",
        }
    }

    /// Parse a canonical name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(state: DeviceState, events: &[DeviceEvent]) -> DeviceState {
        events
            .iter()
            .fold(state, |s, e| s.next(*e).expect("valid transition"))
    }

    #[test]
    fn happy_path_to_cleared() {
        let end = apply(
            DeviceState::Unprovisioned,
            &[
                DeviceEvent::ProvisioningSuccess,
                DeviceEvent::SetupSuccess,
                DeviceEvent::SetupComplete,
                DeviceEvent::Clear,
            ],
        );
        assert_eq!(end, DeviceState::Cleared);
        assert!(end.is_terminal());
    }

    #[test]
    fn clear_on_unprovisioned_is_rejected() {
        let err = DeviceState::Unprovisioned
            .next(DeviceEvent::Clear)
            .unwrap_err();
        assert_eq!(err.machine, "device");
        assert_eq!(err.state, "UNPROVISIONED");
        assert_eq!(err.event, "CLEAR");
    }

    #[test]
    fn cleared_only_accepts_clear() {
        assert_eq!(
            DeviceState::Cleared.accepted_events(),
            vec![DeviceEvent::Clear]
        );
        assert_eq!(
            DeviceState::Cleared.next(DeviceEvent::Clear).unwrap(),
            DeviceState::Cleared
        );
    }

    #[test]
    fn lock_unlock_toggle_after_kiosk_setup() {
        let locked = DeviceState::KioskSetup.next(DeviceEvent::LockDevice).unwrap();
        assert_eq!(locked, DeviceState::Locked);
        assert!(locked.is_locked());
        let unlocked = locked.next(DeviceEvent::UnlockDevice).unwrap();
        assert_eq!(unlocked, DeviceState::Unlocked);
        assert!(!unlocked.is_locked());
        assert_eq!(
            locked.next(DeviceEvent::LockDevice).unwrap(),
            DeviceState::Locked
        );
    }

    #[test]
    fn lock_before_provisioning_is_pseudo() {
        let s = DeviceState::Unprovisioned
            .next(DeviceEvent::LockDevice)
            .unwrap();
        assert_eq!(s, DeviceState::PseudoLocked);
        let s = s.next(DeviceEvent::UnlockDevice).unwrap();
        assert_eq!(s, DeviceState::PseudoUnlocked);
        let s = s.next(DeviceEvent::ProvisioningSuccess).unwrap();
        assert_eq!(s, DeviceState::SetupInProgress);
    }

    #[test]
    fn setup_failed_is_a_dead_end() {
        let failed = DeviceState::SetupInProgress
            .next(DeviceEvent::SetupFailure)
            .unwrap();
        assert_eq!(failed, DeviceState::SetupFailed);
        assert!(failed.accepted_events().is_empty());
    }

    #[test]
    fn repeated_provisioning_success_is_rejected() {
        assert!(DeviceState::SetupInProgress
            .next(DeviceEvent::ProvisioningSuccess)
            .is_err());
    }

    #[test]
    fn unlocked_is_the_default_lock_view() {
        for state in DeviceState::ALL {
            let expected = matches!(state, DeviceState::Locked | DeviceState::PseudoLocked);
            assert_eq!(state.is_locked(), expected, "{state}");
        }
    }

    #[test]
    fn names_round_trip() {
        for state in DeviceState::ALL {
            assert_eq!(DeviceState::from_name(state.as_str()), Some(state));
        }
        for event in DeviceEvent::ALL {
            assert_eq!(DeviceEvent::from_name(event.as_str()), Some(event));
        }
        assert_eq!(
            DeviceEvent::from_name("lock_device"),
            Some(DeviceEvent::LockDevice)
        );
        assert_eq!(DeviceState::from_name("BOGUS"), None);
    }

    #[test]
    fn serde_uses_screaming_case() {
        let json = serde_json::to_string(&DeviceState::PseudoUnlocked).unwrap();
        assert_eq!(json, "\"PSEUDO_UNLOCKED\"");
    }
}
