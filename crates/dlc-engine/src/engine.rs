//! # Engine Assembly
//!
//! [`DeviceLockEngine`] owns every component and wires them in one place.
//! There are no global singletons: an embedding app builds one engine per
//! process and routes boot, wake and clock-change events to it.
//!
//! Wiring done at build time:
//!
//! - the provisioning controller schedules and clears its own alarms
//!   through a commit hook;
//! - the device controller feeds the finalization queue whenever `Cleared`
//!   is enforced, including a repeated `Clear` after an earlier failure.
//!
//! [`DeviceLockEngine::on_boot`] feeds the queue too when the persisted
//! device state is `Cleared` but finalization never started.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use dlc_core::{Clock, SystemClock};
use dlc_state::{
    DeviceState, EnforcementCategory, FinalizationState, ProvisionEvent, ProvisionState,
    ScheduledTimer, TimerKind,
};

use crate::config::EngineConfig;
use crate::controller::{
    DeviceStateController, ProvisionStateController, StateController, TransitionHook,
};
use crate::critical::CriticalFailureHandler;
use crate::error::EngineError;
use crate::finalization::FinalizationController;
use crate::policy::{default_handlers, DevicePolicyPort, PolicyEngine, PolicyHandler};
use crate::scheduler::TimerScheduler;
use crate::store::{keys, ParameterStore};
use crate::timer::{OsTimer, WakeToken};
use crate::work::UniqueWorkDispatcher;

/// What the embedding app should do after a timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WakeAction {
    /// Run the check-in RPC again.
    RetryCheckIn,
    /// Provisioning was resumed by the engine.
    ProvisionResumed,
    /// Show the next step of the provisioning-failed flow.
    NextProvisionFailedStep,
    /// Factory-reset the device.
    ResetDevice,
    /// The wake no longer applies to the current state.
    Ignored,
}

/// Summary of [`DeviceLockEngine::on_boot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootReport {
    /// Timers re-armed from their persisted targets.
    pub rearmed: Vec<TimerKind>,
    /// Category applied at boot.
    pub category: EnforcementCategory,
    /// `false` when enforcement failed and the critical path ran.
    pub enforced: bool,
    /// Finalization checkpoint after resuming.
    pub finalization: FinalizationState,
}

/// Point-in-time view of the engine, used by status surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    /// Persisted device lock state.
    pub device_state: DeviceState,
    /// Persisted provisioning state.
    pub provision_state: ProvisionState,
    /// Category derived from both states.
    pub category: EnforcementCategory,
    /// Finalization checkpoint.
    pub finalization: FinalizationState,
    /// `true` while a mandatory reset countdown is pending.
    pub mandatory_reset: bool,
    /// Every timer slot.
    pub timers: Vec<ScheduledTimer>,
}

/// Builder for [`DeviceLockEngine`].
#[derive(Default)]
pub struct DeviceLockEngineBuilder {
    store: Option<Arc<dyn ParameterStore>>,
    timer: Option<Arc<dyn OsTimer>>,
    dispatcher: Option<Arc<dyn UniqueWorkDispatcher>>,
    port: Option<Arc<dyn DevicePolicyPort>>,
    clock: Option<Arc<dyn Clock>>,
    config: Option<EngineConfig>,
    handlers: Option<Vec<Arc<dyn PolicyHandler>>>,
}

impl DeviceLockEngineBuilder {
    /// Durable parameter store. Required.
    pub fn store(mut self, store: Arc<dyn ParameterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// OS one-shot timer. Required.
    pub fn timer(mut self, timer: Arc<dyn OsTimer>) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Unique work dispatcher. Required.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn UniqueWorkDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Device policy boundary. Required.
    pub fn policy_port(mut self, port: Arc<dyn DevicePolicyPort>) -> Self {
        self.port = Some(port);
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to [`EngineConfig::defaults`].
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the default handler chain.
    pub fn handlers(mut self, handlers: Vec<Arc<dyn PolicyHandler>>) -> Self {
        self.handlers = Some(handlers);
        self
    }

    /// Assemble the engine. Spawns the finalization worker, so this must be
    /// called inside a tokio runtime.
    pub fn build(self) -> Result<DeviceLockEngine, EngineError> {
        let store = self.store.ok_or(EngineError::MissingComponent("store"))?;
        let timer = self.timer.ok_or(EngineError::MissingComponent("timer"))?;
        let dispatcher = self
            .dispatcher
            .ok_or(EngineError::MissingComponent("dispatcher"))?;
        let port = self.port.ok_or(EngineError::MissingComponent("policy port"))?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);
        let config = match self.config {
            Some(config) => config,
            None => EngineConfig::defaults()?,
        };
        let handlers = self
            .handlers
            .unwrap_or_else(|| default_handlers(Arc::clone(&port), &config));

        let scheduler = Arc::new(TimerScheduler::new(
            Arc::clone(&store),
            timer,
            Arc::clone(&clock),
            config.delays,
        ));
        let policy = Arc::new(PolicyEngine::new(handlers, Arc::clone(&store)));
        let critical = Arc::new(CriticalFailureHandler::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            Arc::clone(&dispatcher),
            Arc::clone(&clock),
        ));
        let finalization = FinalizationController::spawn(
            Arc::clone(&store),
            dispatcher,
            port,
            clock,
            config.boot_receiver_component.clone(),
        );

        let device: Arc<DeviceStateController> = Arc::new(
            StateController::new(
                keys::DEVICE_STATE,
                Arc::clone(&store),
                Arc::clone(&policy),
                Arc::clone(&critical),
            )
            .with_hook(Arc::new(FinalizeOnCleared {
                finalization: finalization.clone(),
            })),
        );

        let provision: Arc<ProvisionStateController> = Arc::new(
            StateController::new(
                keys::PROVISION_STATE,
                Arc::clone(&store),
                Arc::clone(&policy),
                Arc::clone(&critical),
            )
            .with_hook(Arc::new(ProvisionAlarms {
                scheduler: Arc::clone(&scheduler),
            })),
        );

        tracing::info!(
            handlers = policy.handler_count(),
            kiosk = %config.kiosk_package,
            "device lock engine assembled"
        );

        Ok(DeviceLockEngine {
            config,
            scheduler,
            policy,
            critical,
            finalization,
            device,
            provision,
        })
    }
}

/// The assembled controller engine.
pub struct DeviceLockEngine {
    config: EngineConfig,
    scheduler: Arc<TimerScheduler>,
    policy: Arc<PolicyEngine>,
    critical: Arc<CriticalFailureHandler>,
    finalization: FinalizationController,
    device: Arc<DeviceStateController>,
    provision: Arc<ProvisionStateController>,
}

impl DeviceLockEngine {
    /// Start assembling an engine.
    pub fn builder() -> DeviceLockEngineBuilder {
        DeviceLockEngineBuilder::default()
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Device lock machine.
    pub fn device(&self) -> &DeviceStateController {
        &self.device
    }

    /// Provisioning machine.
    pub fn provision(&self) -> &ProvisionStateController {
        &self.provision
    }

    /// Persistent timer scheduler.
    pub fn scheduler(&self) -> &TimerScheduler {
        &self.scheduler
    }

    /// Policy handler pipeline.
    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Critical-failure path.
    pub fn critical(&self) -> &CriticalFailureHandler {
        &self.critical
    }

    /// Finalization queue.
    pub fn finalization(&self) -> &FinalizationController {
        &self.finalization
    }

    /// Re-apply the current category, routing failure to the critical path.
    pub async fn enforce_current_policies(&self) -> Result<bool, EngineError> {
        let outcome = self.policy.enforce_current().await?;
        if !outcome.succeeded() {
            self.critical.handle(outcome.category).await;
        }
        Ok(outcome.succeeded())
    }

    /// Process start: re-arm timers, re-apply policies, resume finalization.
    ///
    /// Only a failure to read the machine states is returned. Everything
    /// else is logged and reflected in the report.
    pub async fn on_boot(&self) -> Result<BootReport, EngineError> {
        let rearmed = self.scheduler.reschedule_all_if_needed().await;

        let outcome = self.policy.enforce_current().await?;
        if !outcome.succeeded() {
            self.critical.handle(outcome.category).await;
        }

        if let Err(e) = self.resume_finalization(outcome.succeeded()).await {
            tracing::warn!(error = %e, "finalization resume failed at boot");
        }
        let finalization = self.finalization.state().await;

        tracing::info!(
            rearmed = rearmed.len(),
            category = %outcome.category,
            enforced = outcome.succeeded(),
            finalization = %finalization,
            "boot complete"
        );
        Ok(BootReport {
            rearmed,
            category: outcome.category,
            enforced: outcome.succeeded(),
            finalization,
        })
    }

    // A device committed as `Cleared` whose enforcement failed, or whose
    // process died before the queue was fed, still has a `NotStarted`
    // checkpoint. Start it once the cleared policies are applied.
    async fn resume_finalization(&self, enforced: bool) -> Result<FinalizationState, EngineError> {
        let checkpoint = self.finalization.state().await;
        if enforced
            && checkpoint == FinalizationState::NotStarted
            && self.device.state().await == DeviceState::Cleared
        {
            tracing::info!("device cleared before finalization started; starting it");
            return self.finalization.notify_restrictions_cleared().await;
        }
        self.finalization.resume().await
    }

    /// A timer fired. Clears its slot and returns what to do next.
    pub async fn on_wake(&self, token: WakeToken) -> Result<WakeAction, EngineError> {
        let kind = token.kind();
        self.scheduler.clear_timer(kind).await;
        tracing::info!(token = %token, "timer fired");

        let action = match kind {
            TimerKind::RetryCheckIn => WakeAction::RetryCheckIn,
            TimerKind::ResumeProvision => {
                if self.provision.state().await != ProvisionState::ProvisionPaused {
                    tracing::debug!(token = %token, "stale resume alarm");
                    WakeAction::Ignored
                } else {
                    match self
                        .provision
                        .set_next_state_for_event(ProvisionEvent::ProvisionResume)
                        .await
                    {
                        Ok(_) => WakeAction::ProvisionResumed,
                        // Resumed or moved on by someone else since the check.
                        Err(EngineError::Transition(rejected)) => {
                            tracing::debug!(token = %token, %rejected, "resume alarm raced a transition");
                            WakeAction::Ignored
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            TimerKind::NextProvisionFailedStep => {
                if self.provision.state().await == ProvisionState::ProvisionFailed {
                    WakeAction::NextProvisionFailedStep
                } else {
                    WakeAction::Ignored
                }
            }
            TimerKind::ResetDevice => WakeAction::ResetDevice,
        };
        Ok(action)
    }

    /// The wall clock was changed by the user or the network.
    pub async fn notify_time_changed(&self) -> i64 {
        self.scheduler.notify_time_changed().await
    }

    /// Snapshot of states, category, finalization and timers.
    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        Ok(EngineStatus {
            device_state: self.device.state().await,
            provision_state: self.provision.state().await,
            category: self.policy.current_category().await?,
            finalization: self.finalization.state().await,
            mandatory_reset: self.critical.is_mandatory_reset_scheduled().await,
            timers: self.scheduler.scheduled_timers().await,
        })
    }
}

/// Feeds the finalization queue whenever `Cleared` is enforced.
struct FinalizeOnCleared {
    finalization: FinalizationController,
}

#[async_trait]
impl TransitionHook<DeviceState> for FinalizeOnCleared {
    async fn after_enforced(&self, state: DeviceState) {
        if state != DeviceState::Cleared {
            return;
        }
        if let Err(e) = self.finalization.notify_restrictions_cleared().await {
            tracing::warn!(error = %e, "failed to start finalization");
        }
    }
}

/// Keeps the provisioning alarms in step with the provisioning state.
struct ProvisionAlarms {
    scheduler: Arc<TimerScheduler>,
}

#[async_trait]
impl TransitionHook<ProvisionState> for ProvisionAlarms {
    async fn after_commit(&self, _previous: ProvisionState, current: ProvisionState) {
        match current {
            ProvisionState::ProvisionPaused => {
                self.scheduler.schedule_resume_provision_alarm().await;
            }
            ProvisionState::ProvisionFailed => {
                self.scheduler
                    .schedule_next_provision_failed_step_alarm()
                    .await;
            }
            ProvisionState::ProvisionInProgress | ProvisionState::ProvisionSucceeded => {
                self.scheduler.clear_timer(TimerKind::ResumeProvision).await;
                self.scheduler
                    .clear_timer(TimerKind::NextProvisionFailedStep)
                    .await;
            }
            ProvisionState::Unprovisioned | ProvisionState::KioskProvisioned => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use dlc_core::EpochMillis;
    use dlc_state::DeviceEvent;

    use crate::mock::{ManualClock, RecordingPolicyPort, RecordingTimer, RecordingWorkDispatcher};
    use crate::store::MemoryParameterStore;

    fn engine() -> (DeviceLockEngine, Arc<RecordingTimer>) {
        let timer = Arc::new(RecordingTimer::new());
        let engine = DeviceLockEngine::builder()
            .store(Arc::new(MemoryParameterStore::new()))
            .timer(timer.clone())
            .dispatcher(Arc::new(RecordingWorkDispatcher::new()))
            .policy_port(Arc::new(RecordingPolicyPort::new()))
            .clock(Arc::new(ManualClock::new(EpochMillis::from_millis(10_000))))
            .build()
            .unwrap();
        (engine, timer)
    }

    #[tokio::test]
    async fn builder_requires_store() {
        let result = DeviceLockEngine::builder()
            .timer(Arc::new(RecordingTimer::new()))
            .build();
        assert!(matches!(result, Err(EngineError::MissingComponent("store"))));
    }

    #[tokio::test]
    async fn pause_schedules_and_wake_resumes() {
        let (engine, timer) = engine();
        engine
            .provision()
            .set_next_state_for_event(ProvisionEvent::ProvisionReady)
            .await
            .unwrap();
        engine
            .provision()
            .set_next_state_for_event(ProvisionEvent::ProvisionPause)
            .await
            .unwrap();
        assert_eq!(
            timer.armed(TimerKind::ResumeProvision),
            Some(Duration::from_secs(3600))
        );

        let action = engine
            .on_wake(WakeToken(TimerKind::ResumeProvision))
            .await
            .unwrap();
        assert_eq!(action, WakeAction::ProvisionResumed);
        assert_eq!(
            engine.provision().state().await,
            ProvisionState::ProvisionInProgress
        );
        assert!(engine
            .scheduler()
            .expected_run_time(TimerKind::ResumeProvision)
            .await
            .is_unset());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_resume_wakes_resume_once() {
        let (engine, _) = engine();
        let engine = Arc::new(engine);
        for event in [ProvisionEvent::ProvisionReady, ProvisionEvent::ProvisionPause] {
            engine.provision().set_next_state_for_event(event).await.unwrap();
        }

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine.on_wake(WakeToken(TimerKind::ResumeProvision)).await
                })
            })
            .collect();
        let mut resumed = 0;
        for task in tasks {
            match task.await.unwrap().unwrap() {
                WakeAction::ProvisionResumed => resumed += 1,
                action => assert_eq!(action, WakeAction::Ignored),
            }
        }
        assert_eq!(resumed, 1);
        assert_eq!(
            engine.provision().state().await,
            ProvisionState::ProvisionInProgress
        );
    }

    #[tokio::test]
    async fn stale_resume_wake_is_ignored() {
        let (engine, _) = engine();
        let action = engine
            .on_wake(WakeToken(TimerKind::ResumeProvision))
            .await
            .unwrap();
        assert_eq!(action, WakeAction::Ignored);
    }

    #[tokio::test]
    async fn boot_on_fresh_device_enforces_unlocked() {
        let (engine, _) = engine();
        let report = engine.on_boot().await.unwrap();
        assert!(report.enforced);
        assert_eq!(report.category, EnforcementCategory::Unlocked);
        assert_eq!(report.finalization, FinalizationState::NotStarted);
        assert!(report.rearmed.is_empty());
    }

    #[tokio::test]
    async fn status_reflects_pseudo_lock() {
        let (engine, _) = engine();
        engine
            .device()
            .set_next_state_for_event(DeviceEvent::LockDevice)
            .await
            .unwrap();
        let status = engine.status().await.unwrap();
        assert_eq!(status.device_state, DeviceState::PseudoLocked);
        assert_eq!(status.category, EnforcementCategory::Unlocked);
        assert!(!status.mandatory_reset);
    }
}
