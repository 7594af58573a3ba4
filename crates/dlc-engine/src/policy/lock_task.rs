//! Lock-task (single-app foreground) mode.
//!
//! While provisioning runs, only the controller's own UI may be in the
//! foreground. A locked device is pinned to the kiosk app with the
//! controller and a minimal system UI. Every other category exits
//! lock-task mode by emptying the allowlist.

use std::sync::Arc;

use async_trait::async_trait;

use dlc_core::PackageName;

use super::{DevicePolicyPort, LockTaskFeature, PolicyHandler};
use crate::config::EngineConfig;
use crate::error::PolicyError;

const PROVISIONING_FEATURES: &[LockTaskFeature] = &[LockTaskFeature::GlobalActions];

const LOCKED_FEATURES: &[LockTaskFeature] = &[
    LockTaskFeature::SystemInfo,
    LockTaskFeature::GlobalActions,
    LockTaskFeature::Keyguard,
];

/// Manages the lock-task allowlist and features.
pub struct LockTaskModePolicyHandler {
    port: Arc<dyn DevicePolicyPort>,
    controller: PackageName,
    kiosk: PackageName,
}

impl LockTaskModePolicyHandler {
    /// Handler for the configured kiosk and controller packages.
    pub fn new(port: Arc<dyn DevicePolicyPort>, config: &EngineConfig) -> Self {
        Self {
            port,
            controller: config.controller_package.clone(),
            kiosk: config.kiosk_package.clone(),
        }
    }

    async fn apply(
        &self,
        packages: &[PackageName],
        features: &[LockTaskFeature],
    ) -> Result<(), PolicyError> {
        self.port.set_lock_task_features(features).await?;
        self.port.set_lock_task_packages(packages).await
    }

    async fn exit(&self) -> Result<(), PolicyError> {
        self.apply(&[], &[]).await
    }
}

#[async_trait]
impl PolicyHandler for LockTaskModePolicyHandler {
    fn name(&self) -> &'static str {
        "lock_task"
    }

    async fn on_provision_in_progress(&self) -> Result<(), PolicyError> {
        self.apply(std::slice::from_ref(&self.controller), PROVISIONING_FEATURES)
            .await
    }

    async fn on_provisioned(&self) -> Result<(), PolicyError> {
        self.exit().await
    }

    async fn on_provision_paused(&self) -> Result<(), PolicyError> {
        self.exit().await
    }

    async fn on_provision_failed(&self) -> Result<(), PolicyError> {
        self.exit().await
    }

    async fn on_locked(&self) -> Result<(), PolicyError> {
        let packages = [self.controller.clone(), self.kiosk.clone()];
        self.apply(&packages, LOCKED_FEATURES).await
    }

    async fn on_unlocked(&self) -> Result<(), PolicyError> {
        self.exit().await
    }

    async fn on_cleared(&self) -> Result<(), PolicyError> {
        self.exit().await
    }
}
