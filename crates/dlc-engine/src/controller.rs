//! # State Controllers
//!
//! One [`StateController`] per machine. A controller is the only writer of
//! its machine's persisted state.
//!
//! ## Transition protocol
//!
//! 1. Inside the machine's exclusive section: read, compute the next state,
//!    commit it, bump the policy generation, run the commit hook.
//! 2. Outside the section: enforce policies for that generation.
//! 3. On enforcement failure: run the critical-failure path and return
//!    [`EngineError::EnforcementFailed`]. The committed state stays.
//! 4. On success: run the hook's [`TransitionHook::after_enforced`], then
//!    notify observers.
//!
//! A transition whose next state equals the current state commits nothing.
//! It still waits for enforcement of the current generation so its caller
//! never sees success before the state it asked for is enforced. Its
//! `after_enforced` still runs, so work that an earlier failed or
//! interrupted transition never started gets another trigger. Observers are
//! not notified.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use dlc_state::{
    DeviceLifecycle, DeviceState, Lifecycle, PersistedCode, ProvisionLifecycle, ProvisionState,
};

use crate::critical::CriticalFailureHandler;
use crate::error::EngineError;
use crate::observer::{ObserverId, ObserverRegistry, StateObserver};
use crate::policy::PolicyEngine;
use crate::store::{code_or, read_code, ParameterStore};

/// Internal wiring attached to one controller.
#[async_trait]
pub trait TransitionHook<S: Send + 'static>: Send + Sync {
    /// Runs inside the exclusive section right after a commit.
    async fn after_commit(&self, _previous: S, _current: S) {}

    /// Runs outside the section once `state` is enforced. Called for
    /// committed and coalesced transitions alike.
    async fn after_enforced(&self, _state: S) {}
}

/// Exclusive-section state holder for one machine.
pub struct StateController<L: Lifecycle> {
    key: &'static str,
    store: Arc<dyn ParameterStore>,
    policy: Arc<PolicyEngine>,
    critical: Arc<CriticalFailureHandler>,
    observers: ObserverRegistry<L::State>,
    hook: Option<Arc<dyn TransitionHook<L::State>>>,
    section: Mutex<()>,
}

/// Device lock machine controller.
pub type DeviceStateController = StateController<DeviceLifecycle>;
/// Provisioning machine controller.
pub type ProvisionStateController = StateController<ProvisionLifecycle>;

impl<L: Lifecycle> StateController<L> {
    /// Controller for the machine persisted under `key`.
    pub fn new(
        key: &'static str,
        store: Arc<dyn ParameterStore>,
        policy: Arc<PolicyEngine>,
        critical: Arc<CriticalFailureHandler>,
    ) -> Self {
        Self {
            key,
            store,
            policy,
            critical,
            observers: ObserverRegistry::new(),
            hook: None,
            section: Mutex::new(()),
        }
    }

    /// Attach a commit hook.
    pub fn with_hook(mut self, hook: Arc<dyn TransitionHook<L::State>>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Current persisted state. Read faults are logged and read as the
    /// initial state.
    pub async fn state(&self) -> L::State {
        code_or(&*self.store, self.key, L::initial()).await
    }

    /// Register an observer for committed and enforced state changes.
    pub fn add_callback(&self, observer: Arc<dyn StateObserver<L::State>>) -> ObserverId {
        self.observers.add(observer)
    }

    /// Unregister an observer. Returns `false` for an unknown id.
    pub fn remove_callback(&self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    /// Apply `event` and enforce the resulting policies.
    pub async fn set_next_state_for_event(&self, event: L::Event) -> Result<L::State, EngineError> {
        let (next, committed) = self.commit(event).await?;
        let generation = committed.unwrap_or_else(|| self.policy.current_generation());

        let outcome = self.policy.enforce_for_generation(generation).await?;
        if !outcome.succeeded() {
            self.critical.handle(outcome.category).await;
            return Err(EngineError::EnforcementFailed {
                category: outcome.category,
            });
        }

        if let Some(hook) = &self.hook {
            hook.after_enforced(next).await;
        }
        if committed.is_some() {
            self.observers.notify(next).await;
        }
        Ok(next)
    }

    /// Returns the next state and, when something was written, the
    /// generation of the commit.
    async fn commit(&self, event: L::Event) -> Result<(L::State, Option<u64>), EngineError> {
        let _section = self.section.lock().await;
        let current = read_code(&*self.store, self.key, L::initial()).await?;
        let next = match L::next(current, event) {
            Ok(next) => next,
            Err(rejected) => {
                tracing::warn!(machine = L::NAME, state = %current, event = %event, "transition rejected");
                return Err(rejected.into());
            }
        };

        if next == current {
            tracing::debug!(machine = L::NAME, state = %current, event = %event, "transition coalesced");
            return Ok((next, None));
        }

        self.store.set_int(self.key, next.to_code()).await?;
        let generation = self.policy.advance_generation();
        tracing::info!(
            machine = L::NAME,
            from = %current,
            to = %next,
            event = %event,
            generation,
            "state committed"
        );

        if let Some(hook) = &self.hook {
            hook.after_commit(current, next).await;
        }
        Ok((next, Some(generation)))
    }
}

impl StateController<DeviceLifecycle> {
    /// `true` for `Locked` and `PseudoLocked`.
    pub async fn is_locked(&self) -> bool {
        self.state().await.is_locked()
    }

    /// `true` once the device left the program.
    pub async fn is_cleared(&self) -> bool {
        self.state().await == DeviceState::Cleared
    }
}

impl StateController<ProvisionLifecycle> {
    /// `true` once the kiosk app is provisioned: `KioskProvisioned` or
    /// `ProvisionSucceeded`.
    pub async fn is_provisioned(&self) -> bool {
        self.state().await.is_provisioned()
    }

    /// `true` while provisioning is actively running.
    pub async fn is_in_progress(&self) -> bool {
        self.state().await == ProvisionState::ProvisionInProgress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlc_core::EpochMillis;
    use dlc_state::{DeviceEvent, EnforcementCategory, ProvisionEvent};
    use parking_lot::Mutex as SyncMutex;

    use crate::config::SchedulerDelays;
    use crate::error::ObserverError;
    use crate::mock::{CountingHandler, ManualClock, RecordingTimer, RecordingWorkDispatcher};
    use crate::policy::PolicyHandler;
    use crate::scheduler::TimerScheduler;
    use crate::store::{keys, MemoryParameterStore};

    struct Fixture {
        device: DeviceStateController,
        store: Arc<MemoryParameterStore>,
        dispatcher: Arc<RecordingWorkDispatcher>,
    }

    fn fixture(handlers: Vec<Arc<dyn PolicyHandler>>) -> Fixture {
        let store = Arc::new(MemoryParameterStore::new());
        let clock = Arc::new(ManualClock::new(EpochMillis::from_millis(1_000)));
        let dispatcher = Arc::new(RecordingWorkDispatcher::new());
        let scheduler = Arc::new(TimerScheduler::new(
            store.clone(),
            Arc::new(RecordingTimer::new()),
            clock.clone(),
            SchedulerDelays::default(),
        ));
        let policy = Arc::new(PolicyEngine::new(handlers, store.clone()));
        let critical = Arc::new(CriticalFailureHandler::new(
            store.clone(),
            scheduler,
            dispatcher.clone(),
            clock,
        ));
        let device = StateController::new(keys::DEVICE_STATE, store.clone(), policy, critical);
        Fixture {
            device,
            store,
            dispatcher,
        }
    }

    struct Seen(SyncMutex<Vec<DeviceState>>);

    #[async_trait]
    impl StateObserver<DeviceState> for Seen {
        async fn on_state_changed(&self, state: DeviceState) -> Result<(), ObserverError> {
            self.0.lock().push(state);
            Ok(())
        }
    }

    #[tokio::test]
    async fn rejected_event_leaves_state_unchanged() {
        let f = fixture(vec![]);
        let err = f
            .device
            .set_next_state_for_event(DeviceEvent::SetupComplete)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transition(_)));
        assert_eq!(f.device.state().await, DeviceState::Unprovisioned);
        assert!(f.store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn commit_happens_before_enforcement() {
        let counter = Arc::new(CountingHandler::new("counter"));
        let f = fixture(vec![counter.clone()]);
        f.device
            .set_next_state_for_event(DeviceEvent::LockDevice)
            .await
            .unwrap();
        assert_eq!(f.device.state().await, DeviceState::PseudoLocked);
        assert!(f.device.is_locked().await);
        // Unprovisioned device: the lock view changes but the category does not.
        assert_eq!(counter.categories(), vec![EnforcementCategory::Unlocked]);
    }

    #[tokio::test]
    async fn enforcement_failure_keeps_state_and_runs_critical_path() {
        let failing = Arc::new(CountingHandler::failing_on("failing", EnforcementCategory::Unlocked));
        let f = fixture(vec![failing]);
        let err = f
            .device
            .set_next_state_for_event(DeviceEvent::UnlockDevice)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::EnforcementFailed {
                category: EnforcementCategory::Unlocked
            }
        ));
        assert_eq!(f.device.state().await, DeviceState::PseudoUnlocked);
        assert_eq!(f.dispatcher.enqueue_count(), 1);
    }

    #[tokio::test]
    async fn observers_see_commits_but_not_coalesced_events() {
        let f = fixture(vec![]);
        let seen = Arc::new(Seen(SyncMutex::new(Vec::new())));
        let id = f.device.add_callback(seen.clone());

        f.device.set_next_state_for_event(DeviceEvent::LockDevice).await.unwrap();
        f.device.set_next_state_for_event(DeviceEvent::LockDevice).await.unwrap();
        assert_eq!(*seen.0.lock(), vec![DeviceState::PseudoLocked]);

        assert!(f.device.remove_callback(id));
        f.device.set_next_state_for_event(DeviceEvent::UnlockDevice).await.unwrap();
        assert_eq!(seen.0.lock().len(), 1);
    }

    struct Enforced(SyncMutex<Vec<DeviceState>>);

    #[async_trait]
    impl TransitionHook<DeviceState> for Enforced {
        async fn after_enforced(&self, state: DeviceState) {
            self.0.lock().push(state);
        }
    }

    #[tokio::test]
    async fn enforced_hook_runs_for_coalesced_events_too() {
        let f = fixture(vec![]);
        let hook = Arc::new(Enforced(SyncMutex::new(Vec::new())));
        let device = f.device.with_hook(hook.clone());

        device.set_next_state_for_event(DeviceEvent::LockDevice).await.unwrap();
        device.set_next_state_for_event(DeviceEvent::LockDevice).await.unwrap();
        assert_eq!(
            *hook.0.lock(),
            vec![DeviceState::PseudoLocked, DeviceState::PseudoLocked]
        );
    }

    #[tokio::test]
    async fn enforced_hook_skipped_on_failure() {
        let failing = Arc::new(CountingHandler::failing_on("failing", EnforcementCategory::Unlocked));
        let f = fixture(vec![failing]);
        let hook = Arc::new(Enforced(SyncMutex::new(Vec::new())));
        let device = f.device.with_hook(hook.clone());

        assert!(device.set_next_state_for_event(DeviceEvent::LockDevice).await.is_err());
        assert!(hook.0.lock().is_empty());
    }

    #[tokio::test]
    async fn unreadable_state_fails_the_transition() {
        let f = fixture(vec![]);
        f.store.set_fail_reads(true);
        assert!(matches!(
            f.device.set_next_state_for_event(DeviceEvent::LockDevice).await,
            Err(EngineError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn failed_commit_is_returned() {
        let f = fixture(vec![]);
        f.store.set_fail_writes(true);
        assert!(matches!(
            f.device.set_next_state_for_event(DeviceEvent::LockDevice).await,
            Err(EngineError::Storage(_))
        ));
        f.store.set_fail_writes(false);
        assert_eq!(f.device.state().await, DeviceState::Unprovisioned);
    }

    #[tokio::test]
    async fn provision_controller_reports_provisioned() {
        let store = Arc::new(MemoryParameterStore::new());
        store
            .set_int(keys::PROVISION_STATE, ProvisionState::ProvisionInProgress.to_code())
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::new(EpochMillis::from_millis(1)));
        let scheduler = Arc::new(TimerScheduler::new(
            store.clone(),
            Arc::new(RecordingTimer::new()),
            clock.clone(),
            SchedulerDelays::default(),
        ));
        let policy = Arc::new(PolicyEngine::new(vec![], store.clone()));
        let critical = Arc::new(CriticalFailureHandler::new(
            store.clone(),
            scheduler,
            Arc::new(RecordingWorkDispatcher::new()),
            clock,
        ));
        let provision: ProvisionStateController =
            StateController::new(keys::PROVISION_STATE, store, policy, critical);

        assert!(!provision.is_provisioned().await);
        assert!(provision.is_in_progress().await);

        provision
            .set_next_state_for_event(ProvisionEvent::ProvisionKiosk)
            .await
            .unwrap();
        assert!(provision.is_provisioned().await);
        assert!(!provision.is_in_progress().await);

        provision
            .set_next_state_for_event(ProvisionEvent::ProvisionSuccess)
            .await
            .unwrap();
        assert!(provision.is_provisioned().await);
    }
}
