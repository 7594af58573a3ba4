//! # Persistent Timer Scheduler
//!
//! Every timer kind has one durable slot holding its expected run time in
//! wall-clock epoch milliseconds. `0` means "not scheduled".
//!
//! ## Reboot survival
//!
//! The OS drops armed timers on reboot. On boot the embedding app calls
//! [`TimerScheduler::reschedule_all_if_needed`], which re-arms each kind
//! with whatever remains of its persisted target (immediately if it is
//! already due).
//!
//! ## Clock changes
//!
//! Targets are wall-clock values, so a manual clock change would move them
//! relative to real elapsed time. [`TimerScheduler::notify_time_changed`]
//! measures the jump as wall-clock progress minus monotonic progress since
//! the last baseline and shifts every non-zero target by it.
//!
//! Store faults are logged and read as zero. Timer arm faults are logged
//! and not retried here; the next boot or clock change re-arms.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use dlc_core::{Clock, EpochMillis};
use dlc_state::{ScheduledTimer, TimerKind};

use crate::config::SchedulerDelays;
use crate::store::{bool_or, keys, long_or, ParameterStore};
use crate::timer::{OsTimer, WakeToken};

#[derive(Debug, Clone, Copy)]
struct TimeBaseline {
    wall: EpochMillis,
    monotonic: i64,
}

/// Schedules and re-arms the controller's one-shot alarms.
pub struct TimerScheduler {
    store: Arc<dyn ParameterStore>,
    timer: Arc<dyn OsTimer>,
    clock: Arc<dyn Clock>,
    delays: SchedulerDelays,
    // Exclusive section for read-shift-write sequences. Holds the clock
    // baseline used to detect wall-clock jumps.
    baseline: Mutex<TimeBaseline>,
}

impl TimerScheduler {
    /// Scheduler whose clock baseline is taken now.
    pub fn new(
        store: Arc<dyn ParameterStore>,
        timer: Arc<dyn OsTimer>,
        clock: Arc<dyn Clock>,
        delays: SchedulerDelays,
    ) -> Self {
        let baseline = TimeBaseline {
            wall: clock.now(),
            monotonic: clock.monotonic_millis(),
        };
        Self {
            store,
            timer,
            clock,
            delays,
            baseline: Mutex::new(baseline),
        }
    }

    /// Configured default delays.
    pub fn delays(&self) -> &SchedulerDelays {
        &self.delays
    }

    // -- Scheduling -----------------------------------------------------------

    /// Arm `kind` to fire after `delay` and persist its target.
    ///
    /// Overwrites any previous target for the kind. Returns the new target.
    /// A pending mandatory reset owns the reset slot: scheduling
    /// [`TimerKind::ResetDevice`] then keeps and returns the mandatory target.
    pub async fn schedule(&self, kind: TimerKind, delay: Duration) -> EpochMillis {
        let _section = self.baseline.lock().await;
        if kind == TimerKind::ResetDevice {
            if let Some(target) = self.mandatory_reset_locked().await {
                tracing::warn!(target = %target, "mandatory reset pending; reset alarm kept");
                return target;
            }
        }
        self.schedule_locked(kind, delay).await
    }

    async fn schedule_locked(&self, kind: TimerKind, delay: Duration) -> EpochMillis {
        let target = self.clock.now().saturating_add(delay);
        self.persist(kind, target).await;
        self.arm(kind, delay).await;
        tracing::info!(
            timer = %kind,
            delay_ms = delay.as_millis() as u64,
            target = %target,
            "timer scheduled"
        );
        target
    }

    /// Retry the check-in RPC after `delay`.
    pub async fn schedule_retry_check_in(&self, delay: Duration) -> EpochMillis {
        self.schedule(TimerKind::RetryCheckIn, delay).await
    }

    /// Resume a paused provisioning after the configured pause delay.
    pub async fn schedule_resume_provision_alarm(&self) -> EpochMillis {
        self.schedule(TimerKind::ResumeProvision, self.delays.provision_paused)
            .await
    }

    /// Advance the provisioning-failed flow after its step delay.
    pub async fn schedule_next_provision_failed_step_alarm(&self) -> EpochMillis {
        self.schedule(
            TimerKind::NextProvisionFailedStep,
            self.delays.provision_failed_step,
        )
        .await
    }

    /// Ordinary reset alarm. Keeps a pending mandatory countdown.
    pub async fn schedule_reset_device_alarm(&self) -> EpochMillis {
        self.schedule(TimerKind::ResetDevice, self.delays.reset_device)
            .await
    }

    /// Reset alarm after a critical failure.
    ///
    /// Shares the reset slot and always overwrites it. The persisted
    /// [`keys::MANDATORY_RESET`] flag is set in the same section.
    pub async fn schedule_mandatory_reset_device_alarm(&self) -> EpochMillis {
        let _section = self.baseline.lock().await;
        let target = self
            .schedule_locked(TimerKind::ResetDevice, self.delays.mandatory_reset_device)
            .await;
        if let Err(e) = self.store.set_bool(keys::MANDATORY_RESET, true).await {
            tracing::warn!(error = %e, "failed to persist mandatory reset flag");
        }
        target
    }

    /// Target of the pending mandatory reset.
    ///
    /// `None` unless the mandatory flag is set and the reset slot still
    /// holds a target. A fired or cleared reset slot no longer counts.
    pub async fn mandatory_reset_target(&self) -> Option<EpochMillis> {
        let _section = self.baseline.lock().await;
        self.mandatory_reset_locked().await
    }

    async fn mandatory_reset_locked(&self) -> Option<EpochMillis> {
        if !bool_or(&*self.store, keys::MANDATORY_RESET, false).await {
            return None;
        }
        let target = self.read_target(TimerKind::ResetDevice).await;
        (!target.is_unset()).then_some(target)
    }

    // -- Re-arming ------------------------------------------------------------

    /// Re-arm `kind` from its persisted target. Returns `false` when the
    /// kind is not scheduled.
    pub async fn reschedule_if_needed(&self, kind: TimerKind) -> bool {
        let _section = self.baseline.lock().await;
        self.reschedule_locked(kind).await
    }

    async fn reschedule_locked(&self, kind: TimerKind) -> bool {
        let target = self.read_target(kind).await;
        if target.is_unset() {
            return false;
        }
        let delay = target.remaining_since(self.clock.now());
        self.arm(kind, delay).await;
        tracing::debug!(timer = %kind, delay_ms = delay.as_millis() as u64, "timer re-armed");
        true
    }

    /// Re-arm the check-in retry from its persisted target.
    pub async fn reschedule_retry_check_in_if_needed(&self) -> bool {
        self.reschedule_if_needed(TimerKind::RetryCheckIn).await
    }

    /// Re-arm the resume alarm from its persisted target.
    pub async fn reschedule_resume_provision_alarm_if_needed(&self) -> bool {
        self.reschedule_if_needed(TimerKind::ResumeProvision).await
    }

    /// Re-arm the failed-step alarm from its persisted target.
    pub async fn reschedule_next_provision_failed_step_alarm_if_needed(&self) -> bool {
        self.reschedule_if_needed(TimerKind::NextProvisionFailedStep)
            .await
    }

    /// Re-arm the reset alarm from its persisted target.
    pub async fn reschedule_reset_device_alarm_if_needed(&self) -> bool {
        self.reschedule_if_needed(TimerKind::ResetDevice).await
    }

    /// Re-arm every scheduled kind. Returns the kinds that were armed.
    pub async fn reschedule_all_if_needed(&self) -> Vec<TimerKind> {
        let _section = self.baseline.lock().await;
        let mut armed = Vec::new();
        for kind in TimerKind::ALL {
            if self.reschedule_locked(kind).await {
                armed.push(kind);
            }
        }
        armed
    }

    // -- Clock changes --------------------------------------------------------

    /// Shift every scheduled target by `delta_millis`. Unscheduled kinds stay
    /// at zero.
    pub async fn correct_expected_to_run_time(&self, delta_millis: i64) {
        let _section = self.baseline.lock().await;
        self.correct_locked(delta_millis).await;
    }

    async fn correct_locked(&self, delta_millis: i64) {
        for kind in TimerKind::ALL {
            let target = self.read_target(kind).await;
            if target.is_unset() {
                continue;
            }
            let shifted = target.shifted_by(delta_millis);
            self.persist(kind, shifted).await;
            tracing::info!(timer = %kind, from = %target, to = %shifted, "timer target corrected");
        }
    }

    /// Handle a wall-clock change: shift targets by the jump, reset the
    /// baseline and re-arm everything. Returns the measured jump.
    pub async fn notify_time_changed(&self) -> i64 {
        let mut baseline = self.baseline.lock().await;
        let wall = self.clock.now();
        let monotonic = self.clock.monotonic_millis();
        let wall_progress = wall.as_millis() - baseline.wall.as_millis();
        let real_progress = monotonic - baseline.monotonic;
        let delta = wall_progress - real_progress;

        if delta != 0 {
            tracing::info!(delta_ms = delta, "wall clock changed");
            self.correct_locked(delta).await;
        }
        *baseline = TimeBaseline { wall, monotonic };

        for kind in TimerKind::ALL {
            self.reschedule_locked(kind).await;
        }
        delta
    }

    // -- Reads ----------------------------------------------------------------

    /// Persisted target of `kind`; [`EpochMillis::UNSET`] when unscheduled.
    pub async fn expected_run_time(&self, kind: TimerKind) -> EpochMillis {
        self.read_target(kind).await
    }

    /// Time left until `kind` fires. `None` when unscheduled.
    pub async fn remaining_delay(&self, kind: TimerKind) -> Option<Duration> {
        let target = self.read_target(kind).await;
        (!target.is_unset()).then(|| target.remaining_since(self.clock.now()))
    }

    /// Every timer slot, scheduled or not.
    pub async fn scheduled_timers(&self) -> Vec<ScheduledTimer> {
        let mut timers = Vec::with_capacity(TimerKind::ALL.len());
        for kind in TimerKind::ALL {
            timers.push(ScheduledTimer {
                kind,
                expected_run_epoch_millis: self.read_target(kind).await,
            });
        }
        timers
    }

    /// Zero the persisted target of `kind`.
    ///
    /// Called once the alarm has fired or is no longer relevant. An already
    /// armed OS timer is not cancelled; its wake is handled as stale.
    pub async fn clear_timer(&self, kind: TimerKind) {
        let _section = self.baseline.lock().await;
        self.persist(kind, EpochMillis::UNSET).await;
        tracing::debug!(timer = %kind, "timer cleared");
    }

    // -- Internals ------------------------------------------------------------

    async fn read_target(&self, kind: TimerKind) -> EpochMillis {
        EpochMillis::from_millis(long_or(&*self.store, keys::expected_run_time(kind), 0).await)
    }

    async fn persist(&self, kind: TimerKind, target: EpochMillis) {
        let key = keys::expected_run_time(kind);
        if let Err(e) = self.store.set_long(key, target.as_millis()).await {
            tracing::warn!(timer = %kind, error = %e, "failed to persist timer target");
        }
    }

    async fn arm(&self, kind: TimerKind, delay: Duration) {
        if let Err(e) = self.timer.arm_one_shot(delay, WakeToken(kind)).await {
            tracing::warn!(timer = %kind, error = %e, "failed to arm timer");
        }
    }
}
