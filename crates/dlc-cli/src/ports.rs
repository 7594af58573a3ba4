//! Logging stand-ins for the OS boundaries.
//!
//! The CLI has no device underneath. Policy calls, timer arms and work
//! requests are logged at `info` and reported as successful.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use dlc_core::{PackageName, WorkName};
use dlc_engine::policy::{LockTaskFeature, UserRestriction};
use dlc_engine::{
    DevicePolicyPort, DispatchError, EnqueueOutcome, ExistingWorkPolicy, OsTimer, PolicyError,
    TimerError, UniqueWorkDispatcher, WakeToken, WorkRequest,
};

/// Logs every device policy call.
#[derive(Debug, Default)]
pub struct LoggingPolicyPort;

#[async_trait]
impl DevicePolicyPort for LoggingPolicyPort {
    async fn set_app_op_exemption(&self, package: &PackageName, exempt: bool) -> Result<(), PolicyError> {
        tracing::info!(%package, exempt, "app-op exemption");
        Ok(())
    }

    async fn set_lock_task_packages(&self, packages: &[PackageName]) -> Result<(), PolicyError> {
        let packages: Vec<&str> = packages.iter().map(PackageName::as_str).collect();
        tracing::info!(?packages, "lock-task packages");
        Ok(())
    }

    async fn set_lock_task_features(&self, features: &[LockTaskFeature]) -> Result<(), PolicyError> {
        tracing::info!(?features, "lock-task features");
        Ok(())
    }

    async fn set_user_restriction(
        &self,
        restriction: UserRestriction,
        enabled: bool,
    ) -> Result<(), PolicyError> {
        tracing::info!(%restriction, enabled, "user restriction");
        Ok(())
    }

    async fn set_uninstall_blocked(&self, package: &PackageName, blocked: bool) -> Result<(), PolicyError> {
        tracing::info!(%package, blocked, "uninstall block");
        Ok(())
    }

    async fn set_role_holder(
        &self,
        role: &str,
        package: &PackageName,
        held: bool,
    ) -> Result<(), PolicyError> {
        tracing::info!(role, %package, held, "role holder");
        Ok(())
    }

    async fn set_keep_alive(&self, package: &PackageName, enabled: bool) -> Result<(), PolicyError> {
        tracing::info!(%package, enabled, "keep alive");
        Ok(())
    }

    async fn set_component_enabled(&self, component: &str, enabled: bool) -> Result<(), PolicyError> {
        tracing::info!(component, enabled, "component state");
        Ok(())
    }
}

/// Logs timer arms. Nothing fires; deliver wakes with `dlc wake`.
#[derive(Debug, Default)]
pub struct LoggingTimer;

#[async_trait]
impl OsTimer for LoggingTimer {
    async fn arm_one_shot(&self, delay: Duration, token: WakeToken) -> Result<(), TimerError> {
        tracing::info!(%token, delay_ms = delay.as_millis() as u64, "timer armed");
        Ok(())
    }
}

/// Logs work requests and enforces uniqueness for the process lifetime.
#[derive(Debug, Default)]
pub struct LoggingWorkDispatcher {
    live: Mutex<HashSet<WorkName>>,
}

#[async_trait]
impl UniqueWorkDispatcher for LoggingWorkDispatcher {
    async fn enqueue_unique(
        &self,
        name: WorkName,
        policy: ExistingWorkPolicy,
        request: WorkRequest,
    ) -> Result<EnqueueOutcome, DispatchError> {
        let payload = serde_json::to_string(&request.kind).map_err(|e| DispatchError {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let mut live = self.live.lock();
        if policy == ExistingWorkPolicy::Keep && live.contains(&name) {
            tracing::info!(%name, "work already live; kept");
            return Ok(EnqueueOutcome::KeptExisting);
        }
        live.insert(name.clone());
        tracing::info!(%name, id = %request.id, payload, "work enqueued");
        Ok(EnqueueOutcome::Enqueued)
    }
}
