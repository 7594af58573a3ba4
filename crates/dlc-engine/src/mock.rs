//! In-memory test doubles for every external boundary.
//!
//! Compiled for this crate's tests and, behind the `test-support` feature,
//! for other crates' tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use dlc_core::{Clock, EpochMillis, PackageName, WorkName};
use dlc_state::{EnforcementCategory, TimerKind};

use crate::error::{DispatchError, PolicyError, TimerError};
use crate::policy::{DevicePolicyPort, LockTaskFeature, PolicyHandler, UserRestriction};
use crate::timer::{OsTimer, WakeToken};
use crate::work::{EnqueueOutcome, ExistingWorkPolicy, UniqueWorkDispatcher, WorkRequest};

// -- Clock --------------------------------------------------------------------

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    wall: AtomicI64,
    monotonic: AtomicI64,
}

impl ManualClock {
    /// Clock reading `start` on the wall and zero on the monotonic scale.
    pub fn new(start: EpochMillis) -> Self {
        Self {
            wall: AtomicI64::new(start.as_millis()),
            monotonic: AtomicI64::new(0),
        }
    }

    /// Let real time pass: both clocks move.
    pub fn advance(&self, by: Duration) {
        let millis = by.as_millis() as i64;
        self.wall.fetch_add(millis, Ordering::SeqCst);
        self.monotonic.fetch_add(millis, Ordering::SeqCst);
    }

    /// Change the wall clock only, as a user or network time update would.
    pub fn jump_wall(&self, delta_millis: i64) {
        self.wall.fetch_add(delta_millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> EpochMillis {
        EpochMillis::from_millis(self.wall.load(Ordering::SeqCst))
    }

    fn monotonic_millis(&self) -> i64 {
        self.monotonic.load(Ordering::SeqCst)
    }
}

// -- Timer --------------------------------------------------------------------

/// Records armed timers instead of firing them.
#[derive(Debug, Default)]
pub struct RecordingTimer {
    armed: Mutex<HashMap<TimerKind, Duration>>,
    arms: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingTimer {
    /// Timer that records arms and never fires.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay of the most recent arm for `kind`.
    pub fn armed(&self, kind: TimerKind) -> Option<Duration> {
        self.armed.lock().get(&kind).copied()
    }

    /// Total successful arm calls.
    pub fn arm_count(&self) -> usize {
        self.arms.load(Ordering::SeqCst)
    }

    /// Forget armed timers, as a reboot does.
    pub fn reboot(&self) {
        self.armed.lock().clear();
    }

    /// Make every following call fail until reset.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl OsTimer for RecordingTimer {
    async fn arm_one_shot(&self, delay: Duration, token: WakeToken) -> Result<(), TimerError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TimerError {
                token: token.to_string(),
                reason: "injected failure".into(),
            });
        }
        self.armed.lock().insert(token.kind(), delay);
        self.arms.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// -- Work dispatcher ----------------------------------------------------------

/// Unique-work dispatcher that keeps live work in memory.
#[derive(Debug, Default)]
pub struct RecordingWorkDispatcher {
    live: Mutex<HashMap<WorkName, WorkRequest>>,
    calls: Mutex<Vec<(WorkName, ExistingWorkPolicy)>>,
    kept: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingWorkDispatcher {
    /// Dispatcher with no live work.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests actually enqueued (not kept-existing).
    pub fn enqueue_count(&self) -> usize {
        self.calls.lock().len() - self.kept_count()
    }

    /// Every call, in order.
    pub fn calls(&self) -> Vec<(WorkName, ExistingWorkPolicy)> {
        self.calls.lock().clone()
    }

    /// The live request under `name`.
    pub fn live(&self, name: impl Into<WorkName>) -> Option<WorkRequest> {
        self.live.lock().get(&name.into()).cloned()
    }

    /// Mark the work under `name` as finished.
    pub fn complete(&self, name: impl Into<WorkName>) -> Option<WorkRequest> {
        self.live.lock().remove(&name.into())
    }

    /// Make every following call fail until reset.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn kept_count(&self) -> usize {
        self.kept.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UniqueWorkDispatcher for RecordingWorkDispatcher {
    async fn enqueue_unique(
        &self,
        name: WorkName,
        policy: ExistingWorkPolicy,
        request: WorkRequest,
    ) -> Result<EnqueueOutcome, DispatchError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError {
                name: name.to_string(),
                reason: "injected failure".into(),
            });
        }
        let mut live = self.live.lock();
        let outcome = match (live.contains_key(&name), policy) {
            (true, ExistingWorkPolicy::Keep) => EnqueueOutcome::KeptExisting,
            _ => {
                live.insert(name.clone(), request);
                EnqueueOutcome::Enqueued
            }
        };
        if outcome == EnqueueOutcome::KeptExisting {
            self.kept.fetch_add(1, Ordering::SeqCst);
        }
        self.calls.lock().push((name, policy));
        Ok(outcome)
    }
}

// -- Device policy port -------------------------------------------------------

/// Last value applied through each [`DevicePolicyPort`] operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortState {
    /// App-op exemption per package.
    pub app_op_exemptions: BTreeMap<PackageName, bool>,
    /// Last lock-task allowlist.
    pub lock_task_packages: Vec<PackageName>,
    /// Last lock-task feature set.
    pub lock_task_features: Vec<LockTaskFeature>,
    /// User restriction state.
    pub user_restrictions: BTreeMap<UserRestriction, bool>,
    /// Uninstall block per package.
    pub uninstall_blocked: BTreeMap<PackageName, bool>,
    /// Role holders keyed by role and package.
    pub roles: BTreeMap<(String, PackageName), bool>,
    /// Keep-alive per package.
    pub keep_alive: BTreeMap<PackageName, bool>,
    /// Component enabled state.
    pub components: BTreeMap<String, bool>,
}

/// Policy port that applies calls to an in-memory [`PortState`].
///
/// Individual operations can be made to fail by name.
#[derive(Debug, Default)]
pub struct RecordingPolicyPort {
    state: Mutex<PortState>,
    calls: AtomicUsize,
    failing: Mutex<HashSet<&'static str>>,
}

impl RecordingPolicyPort {
    /// Port with nothing applied and no failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the applied state.
    pub fn snapshot(&self) -> PortState {
        self.state.lock().clone()
    }

    /// Successful calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every call to `operation` fail until cleared.
    pub fn fail_operation(&self, operation: &'static str) {
        self.failing.lock().insert(operation);
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    fn apply(&self, operation: &'static str, f: impl FnOnce(&mut PortState)) -> Result<(), PolicyError> {
        if self.failing.lock().contains(operation) {
            return Err(PolicyError::Os {
                operation,
                reason: "injected failure".into(),
            });
        }
        f(&mut self.state.lock());
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DevicePolicyPort for RecordingPolicyPort {
    async fn set_app_op_exemption(&self, package: &PackageName, exempt: bool) -> Result<(), PolicyError> {
        self.apply("set_app_op_exemption", |s| {
            s.app_op_exemptions.insert(package.clone(), exempt);
        })
    }

    async fn set_lock_task_packages(&self, packages: &[PackageName]) -> Result<(), PolicyError> {
        self.apply("set_lock_task_packages", |s| {
            s.lock_task_packages = packages.to_vec();
        })
    }

    async fn set_lock_task_features(&self, features: &[LockTaskFeature]) -> Result<(), PolicyError> {
        self.apply("set_lock_task_features", |s| {
            s.lock_task_features = features.to_vec();
        })
    }

    async fn set_user_restriction(
        &self,
        restriction: UserRestriction,
        enabled: bool,
    ) -> Result<(), PolicyError> {
        self.apply("set_user_restriction", |s| {
            s.user_restrictions.insert(restriction, enabled);
        })
    }

    async fn set_uninstall_blocked(&self, package: &PackageName, blocked: bool) -> Result<(), PolicyError> {
        self.apply("set_uninstall_blocked", |s| {
            s.uninstall_blocked.insert(package.clone(), blocked);
        })
    }

    async fn set_role_holder(
        &self,
        role: &str,
        package: &PackageName,
        held: bool,
    ) -> Result<(), PolicyError> {
        self.apply("set_role_holder", |s| {
            s.roles.insert((role.to_string(), package.clone()), held);
        })
    }

    async fn set_keep_alive(&self, package: &PackageName, enabled: bool) -> Result<(), PolicyError> {
        self.apply("set_keep_alive", |s| {
            s.keep_alive.insert(package.clone(), enabled);
        })
    }

    async fn set_component_enabled(&self, component: &str, enabled: bool) -> Result<(), PolicyError> {
        self.apply("set_component_enabled", |s| {
            s.components.insert(component.to_string(), enabled);
        })
    }
}

// -- Policy handler -----------------------------------------------------------

/// Handler that records which categories it was asked to apply.
#[derive(Debug)]
pub struct CountingHandler {
    name: &'static str,
    seen: Mutex<Vec<EnforcementCategory>>,
    fail_on: Option<EnforcementCategory>,
    delay: Duration,
}

impl CountingHandler {
    /// Handler that always succeeds.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            seen: Mutex::new(Vec::new()),
            fail_on: None,
            delay: Duration::ZERO,
        }
    }

    /// A handler that fails whenever `category` is applied.
    pub fn failing_on(name: &'static str, category: EnforcementCategory) -> Self {
        Self {
            fail_on: Some(category),
            ..Self::new(name)
        }
    }

    /// Sleep for `delay` on every call, widening race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of chain passes that reached this handler.
    pub fn invocations(&self) -> usize {
        self.seen.lock().len()
    }

    /// Categories applied, in order.
    pub fn categories(&self) -> Vec<EnforcementCategory> {
        self.seen.lock().clone()
    }

    async fn record(&self, category: EnforcementCategory) -> Result<(), PolicyError> {
        self.seen.lock().push(category);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_on == Some(category) {
            return Err(PolicyError::Handler {
                handler: self.name,
                reason: format!("injected failure for {category}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyHandler for CountingHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn on_provision_in_progress(&self) -> Result<(), PolicyError> {
        self.record(EnforcementCategory::ProvisionInProgress).await
    }

    async fn on_provisioned(&self) -> Result<(), PolicyError> {
        self.record(EnforcementCategory::Provisioned).await
    }

    async fn on_provision_paused(&self) -> Result<(), PolicyError> {
        self.record(EnforcementCategory::ProvisionPaused).await
    }

    async fn on_provision_failed(&self) -> Result<(), PolicyError> {
        self.record(EnforcementCategory::ProvisionFailed).await
    }

    async fn on_locked(&self) -> Result<(), PolicyError> {
        self.record(EnforcementCategory::Locked).await
    }

    async fn on_unlocked(&self) -> Result<(), PolicyError> {
        self.record(EnforcementCategory::Unlocked).await
    }

    async fn on_cleared(&self) -> Result<(), PolicyError> {
        self.record(EnforcementCategory::Cleared).await
    }
}
