//! # Lifecycle Abstraction
//!
//! The engine drives both machines through one generic controller. This
//! module names what the controller needs from a machine: its state and
//! event types, its initial state, and its pure transition function.

use crate::device::{DeviceEvent, DeviceState};
use crate::error::TransitionRejected;
use crate::finalization::FinalizationState;
use crate::provision::{ProvisionEvent, ProvisionState};

/// Stable integer encoding used by the durable parameter store.
///
/// Codes are part of the persisted format. Never renumber them.
pub trait PersistedCode: Sized + Copy {
    /// Encode.
    fn to_code(self) -> i32;
    /// Decode. `None` for unknown codes.
    fn from_code(code: i32) -> Option<Self>;
}

/// A closed state machine with a pure transition function.
pub trait Lifecycle: Send + Sync + 'static {
    /// State type.
    type State: PersistedCode
        + PartialEq
        + std::fmt::Debug
        + std::fmt::Display
        + Send
        + Sync
        + 'static;
    /// Event type.
    type Event: Copy + std::fmt::Debug + std::fmt::Display + Send + Sync + 'static;

    /// Short machine name used in logs.
    const NAME: &'static str;

    /// State assumed when nothing has been persisted yet.
    fn initial() -> Self::State;

    /// Apply `event` to `state`.
    fn next(state: Self::State, event: Self::Event) -> Result<Self::State, TransitionRejected>;
}

/// The device lock machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceLifecycle;

impl Lifecycle for DeviceLifecycle {
    type State = DeviceState;
    type Event = DeviceEvent;

    const NAME: &'static str = "device";

    fn initial() -> DeviceState {
        DeviceState::Unprovisioned
    }

    fn next(state: DeviceState, event: DeviceEvent) -> Result<DeviceState, TransitionRejected> {
        state.next(event)
    }
}

/// The provisioning machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProvisionLifecycle;

impl Lifecycle for ProvisionLifecycle {
    type State = ProvisionState;
    type Event = ProvisionEvent;

    const NAME: &'static str = "provision";

    fn initial() -> ProvisionState {
        ProvisionState::Unprovisioned
    }

    fn next(
        state: ProvisionState,
        event: ProvisionEvent,
    ) -> Result<ProvisionState, TransitionRejected> {
        state.next(event)
    }
}

fn position_code<T: PartialEq>(all: &[T], value: &T) -> i32 {
    all.iter()
        .position(|v| v == value)
        .and_then(|i| i32::try_from(i).ok())
        .unwrap_or(-1)
}

fn from_position<T: Copy>(all: &[T], code: i32) -> Option<T> {
    usize::try_from(code).ok().and_then(|i| all.get(i).copied())
}

impl PersistedCode for DeviceState {
    fn to_code(self) -> i32 {
        position_code(&DeviceState::ALL, &self)
    }

    fn from_code(code: i32) -> Option<Self> {
        from_position(&DeviceState::ALL, code)
    }
}

impl PersistedCode for ProvisionState {
    fn to_code(self) -> i32 {
        position_code(&ProvisionState::ALL, &self)
    }

    fn from_code(code: i32) -> Option<Self> {
        from_position(&ProvisionState::ALL, code)
    }
}

impl PersistedCode for FinalizationState {
    fn to_code(self) -> i32 {
        position_code(&FinalizationState::ALL, &self)
    }

    fn from_code(code: i32) -> Option<Self> {
        from_position(&FinalizationState::ALL, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(DeviceState::Unprovisioned.to_code(), 0);
        assert_eq!(DeviceState::Cleared.to_code(), 9);
        assert_eq!(ProvisionState::ProvisionSucceeded.to_code(), 5);
        assert_eq!(FinalizationState::Reported.to_code(), 3);
    }

    #[test]
    fn unknown_codes_decode_to_none() {
        assert_eq!(DeviceState::from_code(-1), None);
        assert_eq!(DeviceState::from_code(10), None);
        assert_eq!(ProvisionState::from_code(6), None);
        assert_eq!(FinalizationState::from_code(4), None);
    }

    #[test]
    fn initial_states() {
        assert_eq!(DeviceLifecycle::initial(), DeviceState::Unprovisioned);
        assert_eq!(ProvisionLifecycle::initial(), ProvisionState::Unprovisioned);
    }

    fn device_state() -> impl Strategy<Value = DeviceState> {
        (0usize..DeviceState::ALL.len()).prop_map(|i| DeviceState::ALL[i])
    }

    fn device_event() -> impl Strategy<Value = DeviceEvent> {
        (0usize..DeviceEvent::ALL.len()).prop_map(|i| DeviceEvent::ALL[i])
    }

    fn provision_state() -> impl Strategy<Value = ProvisionState> {
        (0usize..ProvisionState::ALL.len()).prop_map(|i| ProvisionState::ALL[i])
    }

    fn provision_event() -> impl Strategy<Value = ProvisionEvent> {
        (0usize..ProvisionEvent::ALL.len()).prop_map(|i| ProvisionEvent::ALL[i])
    }

    proptest! {
        #[test]
        fn device_codes_round_trip(state in device_state()) {
            prop_assert_eq!(DeviceState::from_code(state.to_code()), Some(state));
        }

        #[test]
        fn device_rejection_names_the_pair(state in device_state(), event in device_event()) {
            match DeviceLifecycle::next(state, event) {
                Ok(next) => prop_assert!(!state.is_terminal() || next == state),
                Err(rejected) => {
                    prop_assert_eq!(rejected.state, state.as_str());
                    prop_assert_eq!(rejected.event, event.as_str());
                }
            }
        }

        #[test]
        fn provision_never_downgrades_from_success(event in provision_event()) {
            prop_assert!(ProvisionLifecycle::next(ProvisionState::ProvisionSucceeded, event).is_err());
        }

        #[test]
        fn provision_codes_round_trip(state in provision_state()) {
            prop_assert_eq!(ProvisionState::from_code(state.to_code()), Some(state));
        }
    }
}
