//! Critical-failure recovery.
//!
//! Entered when the handler chain fails to apply a committed state. The
//! device is in an unknown policy state, so it is sent down the mandatory
//! reset path: the reset alarm is scheduled and the server is told what
//! happened.
//!
//! The path runs at most once per process. While a mandatory reset is
//! pending (flag set and the reset slot still holds a target) a reboot does
//! not restart its countdown. Once the slot has fired or been cleared, the
//! next failure schedules a fresh one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dlc_core::{Clock, REPORT_PROVISION_STATE_WORK};
use dlc_state::{
    DeviceLifecycle, DeviceState, EnforcementCategory, Lifecycle, ProvisionLifecycle,
    ProvisionState,
};

use crate::error::EngineError;
use crate::scheduler::TimerScheduler;
use crate::store::{code_or, keys, ParameterStore};
use crate::work::{EnqueueOutcome, ExistingWorkPolicy, UniqueWorkDispatcher, WorkKind, WorkRequest};

/// What the critical path did on a given call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriticalOutcome {
    /// The path already ran in this process.
    AlreadyHandled,
    /// The path ran.
    Handled {
        /// `true` when the reset alarm was scheduled by this call.
        reset_scheduled: bool,
        /// Result of enqueueing the report, `None` if dispatch failed.
        report: Option<EnqueueOutcome>,
    },
}

/// Mandatory-reset recovery for failed enforcement.
pub struct CriticalFailureHandler {
    store: Arc<dyn ParameterStore>,
    scheduler: Arc<TimerScheduler>,
    dispatcher: Arc<dyn UniqueWorkDispatcher>,
    clock: Arc<dyn Clock>,
    handled: AtomicBool,
}

impl CriticalFailureHandler {
    /// Build the handler. The one-shot guard starts disarmed.
    pub fn new(
        store: Arc<dyn ParameterStore>,
        scheduler: Arc<TimerScheduler>,
        dispatcher: Arc<dyn UniqueWorkDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            scheduler,
            dispatcher,
            clock,
            handled: AtomicBool::new(false),
        }
    }

    /// `true` once the path has run in this process.
    pub fn is_handled(&self) -> bool {
        self.handled.load(Ordering::SeqCst)
    }

    /// Whether a mandatory reset countdown is pending.
    pub async fn is_mandatory_reset_scheduled(&self) -> bool {
        self.scheduler.mandatory_reset_target().await.is_some()
    }

    /// Run the recovery path for a failed `category`. Faults are logged.
    pub async fn handle(&self, category: EnforcementCategory) -> CriticalOutcome {
        if self.handled.swap(true, Ordering::SeqCst) {
            tracing::debug!(category = %category, "critical failure already handled");
            return CriticalOutcome::AlreadyHandled;
        }
        tracing::error!(category = %category, "critical enforcement failure; entering mandatory reset");

        let reset_scheduled = match self.scheduler.mandatory_reset_target().await {
            Some(target) => {
                tracing::info!(target = %target, "mandatory reset already pending");
                false
            }
            None => {
                let target = self.scheduler.schedule_mandatory_reset_device_alarm().await;
                tracing::warn!(target = %target, "mandatory reset scheduled");
                true
            }
        };

        let report = match self.report(category).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!(error = %e, "failed to enqueue provision state report");
                None
            }
        };

        CriticalOutcome::Handled {
            reset_scheduled,
            report,
        }
    }

    async fn report(&self, category: EnforcementCategory) -> Result<EnqueueOutcome, EngineError> {
        let provision_state: ProvisionState =
            code_or(&*self.store, keys::PROVISION_STATE, ProvisionLifecycle::initial()).await;
        let device_state: DeviceState =
            code_or(&*self.store, keys::DEVICE_STATE, DeviceLifecycle::initial()).await;
        let request = WorkRequest::new(
            WorkKind::ReportProvisionState {
                provision_state,
                device_state,
                failed_category: category,
            },
            self.clock.now(),
        );
        let outcome = self
            .dispatcher
            .enqueue_unique(REPORT_PROVISION_STATE_WORK.into(), ExistingWorkPolicy::Keep, request)
            .await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use dlc_core::EpochMillis;
    use dlc_state::TimerKind;

    use crate::config::SchedulerDelays;
    use crate::mock::{ManualClock, RecordingTimer, RecordingWorkDispatcher};
    use crate::store::MemoryParameterStore;

    struct Fixture {
        handler: CriticalFailureHandler,
        store: Arc<MemoryParameterStore>,
        timer: Arc<RecordingTimer>,
        dispatcher: Arc<RecordingWorkDispatcher>,
        scheduler: Arc<TimerScheduler>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryParameterStore::new());
        let timer = Arc::new(RecordingTimer::new());
        let clock = Arc::new(ManualClock::new(EpochMillis::from_millis(1_000_000)));
        let dispatcher = Arc::new(RecordingWorkDispatcher::new());
        let scheduler = Arc::new(TimerScheduler::new(
            store.clone(),
            timer.clone(),
            clock.clone(),
            SchedulerDelays::default(),
        ));
        let handler = CriticalFailureHandler::new(
            store.clone(),
            scheduler.clone(),
            dispatcher.clone(),
            clock.clone(),
        );
        Fixture {
            handler,
            store,
            timer,
            dispatcher,
            scheduler,
            clock,
        }
    }

    #[tokio::test]
    async fn schedules_reset_and_reports_once() {
        let f = fixture();
        let first = f.handler.handle(EnforcementCategory::Locked).await;
        assert_eq!(
            first,
            CriticalOutcome::Handled {
                reset_scheduled: true,
                report: Some(EnqueueOutcome::Enqueued)
            }
        );
        assert_eq!(
            f.timer.armed(TimerKind::ResetDevice),
            Some(Duration::from_secs(1800))
        );
        assert!(f.handler.is_mandatory_reset_scheduled().await);

        let second = f.handler.handle(EnforcementCategory::Locked).await;
        assert_eq!(second, CriticalOutcome::AlreadyHandled);
        assert_eq!(f.dispatcher.enqueue_count(), 1);
    }

    #[tokio::test]
    async fn pending_mandatory_reset_keeps_its_countdown() {
        let f = fixture();
        let pending = f.scheduler.schedule_mandatory_reset_device_alarm().await;
        f.clock.advance(Duration::from_secs(600));

        let outcome = f.handler.handle(EnforcementCategory::Unlocked).await;
        assert!(matches!(
            outcome,
            CriticalOutcome::Handled {
                reset_scheduled: false,
                ..
            }
        ));
        assert_eq!(f.scheduler.expected_run_time(TimerKind::ResetDevice).await, pending);
        assert_eq!(f.dispatcher.enqueue_count(), 1);
    }

    #[tokio::test]
    async fn fired_reset_slot_is_scheduled_again() {
        let f = fixture();
        f.store.set_bool(keys::MANDATORY_RESET, true).await.unwrap();
        assert!(f.scheduler.expected_run_time(TimerKind::ResetDevice).await.is_unset());

        let outcome = f.handler.handle(EnforcementCategory::Locked).await;
        assert!(matches!(
            outcome,
            CriticalOutcome::Handled {
                reset_scheduled: true,
                ..
            }
        ));
        assert_eq!(
            f.timer.armed(TimerKind::ResetDevice),
            Some(Duration::from_secs(1800))
        );
        assert!(f.handler.is_mandatory_reset_scheduled().await);
    }

    #[tokio::test]
    async fn report_carries_failed_category() {
        let f = fixture();
        f.handler.handle(EnforcementCategory::ProvisionInProgress).await;
        let live = f
            .dispatcher
            .live(REPORT_PROVISION_STATE_WORK)
            .expect("report enqueued");
        assert!(matches!(
            live.kind,
            WorkKind::ReportProvisionState {
                failed_category: EnforcementCategory::ProvisionInProgress,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn dispatch_failure_is_swallowed() {
        let f = fixture();
        f.dispatcher.set_fail(true);
        let outcome = f.handler.handle(EnforcementCategory::Locked).await;
        assert!(matches!(outcome, CriticalOutcome::Handled { report: None, .. }));
    }
}
