//! Background and hibernation exemptions for the controller and kiosk apps.
//!
//! The controller needs to run its check-in and timers in the background
//! for the whole program. The kiosk app is exempt only while it is
//! provisioned.

use std::sync::Arc;

use async_trait::async_trait;

use dlc_core::PackageName;

use super::{DevicePolicyPort, PolicyHandler};
use crate::config::EngineConfig;
use crate::error::PolicyError;

/// Toggles app-ops exemptions.
pub struct AppOpsPolicyHandler {
    port: Arc<dyn DevicePolicyPort>,
    controller: PackageName,
    kiosk: PackageName,
}

impl AppOpsPolicyHandler {
    /// Handler for the configured kiosk and controller packages.
    pub fn new(port: Arc<dyn DevicePolicyPort>, config: &EngineConfig) -> Self {
        Self {
            port,
            controller: config.controller_package.clone(),
            kiosk: config.kiosk_package.clone(),
        }
    }

    async fn exempt(&self, controller: bool, kiosk: bool) -> Result<(), PolicyError> {
        self.port
            .set_app_op_exemption(&self.controller, controller)
            .await?;
        self.port.set_app_op_exemption(&self.kiosk, kiosk).await
    }
}

#[async_trait]
impl PolicyHandler for AppOpsPolicyHandler {
    fn name(&self) -> &'static str {
        "app_ops"
    }

    async fn on_provision_in_progress(&self) -> Result<(), PolicyError> {
        self.exempt(true, false).await
    }

    async fn on_provisioned(&self) -> Result<(), PolicyError> {
        self.exempt(true, true).await
    }

    async fn on_provision_paused(&self) -> Result<(), PolicyError> {
        self.exempt(true, false).await
    }

    async fn on_provision_failed(&self) -> Result<(), PolicyError> {
        self.exempt(true, false).await
    }

    async fn on_locked(&self) -> Result<(), PolicyError> {
        self.exempt(true, true).await
    }

    async fn on_unlocked(&self) -> Result<(), PolicyError> {
        self.exempt(true, true).await
    }

    async fn on_cleared(&self) -> Result<(), PolicyError> {
        self.exempt(false, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingPolicyPort;

    fn handler() -> (AppOpsPolicyHandler, Arc<RecordingPolicyPort>, EngineConfig) {
        let port = Arc::new(RecordingPolicyPort::new());
        let config = EngineConfig::defaults().unwrap();
        (AppOpsPolicyHandler::new(port.clone(), &config), port, config)
    }

    #[tokio::test]
    async fn kiosk_exempt_only_once_provisioned() {
        let (h, port, cfg) = handler();
        h.on_provision_in_progress().await.unwrap();
        let snap = port.snapshot();
        assert_eq!(snap.app_op_exemptions.get(&cfg.controller_package), Some(&true));
        assert_eq!(snap.app_op_exemptions.get(&cfg.kiosk_package), Some(&false));

        h.on_locked().await.unwrap();
        assert_eq!(port.snapshot().app_op_exemptions.get(&cfg.kiosk_package), Some(&true));
    }

    #[tokio::test]
    async fn cleared_removes_all_exemptions() {
        let (h, port, _) = handler();
        h.on_unlocked().await.unwrap();
        h.on_cleared().await.unwrap();
        assert!(port.snapshot().app_op_exemptions.values().all(|v| !v));
    }

    #[tokio::test]
    async fn os_failure_propagates() {
        let (h, port, _) = handler();
        port.fail_operation("set_app_op_exemption");
        assert!(h.on_provisioned().await.is_err());
    }
}
