use std::sync::Arc;

use async_trait::async_trait;

use dlc_core::PackageName;

use super::{DevicePolicyPort, PolicyHandler};
use crate::config::EngineConfig;
use crate::error::PolicyError;

/// Keeps the controller, and the kiosk once provisioned, from being killed.
pub struct KeepAlivePolicyHandler {
    port: Arc<dyn DevicePolicyPort>,
    controller: PackageName,
    kiosk: PackageName,
}

impl KeepAlivePolicyHandler {
    /// Handler for the configured kiosk and controller packages.
    pub fn new(port: Arc<dyn DevicePolicyPort>, config: &EngineConfig) -> Self {
        Self {
            port,
            controller: config.controller_package.clone(),
            kiosk: config.kiosk_package.clone(),
        }
    }

    async fn keep(&self, controller: bool, kiosk: bool) -> Result<(), PolicyError> {
        self.port.set_keep_alive(&self.controller, controller).await?;
        self.port.set_keep_alive(&self.kiosk, kiosk).await
    }
}

#[async_trait]
impl PolicyHandler for KeepAlivePolicyHandler {
    fn name(&self) -> &'static str {
        "keep_alive"
    }

    async fn on_provision_in_progress(&self) -> Result<(), PolicyError> {
        self.keep(true, false).await
    }

    async fn on_provisioned(&self) -> Result<(), PolicyError> {
        self.keep(true, true).await
    }

    async fn on_provision_paused(&self) -> Result<(), PolicyError> {
        self.keep(true, false).await
    }

    async fn on_provision_failed(&self) -> Result<(), PolicyError> {
        // The failure flow still has to reach the reset step.
        self.keep(true, false).await
    }

    async fn on_locked(&self) -> Result<(), PolicyError> {
        self.keep(true, true).await
    }

    async fn on_unlocked(&self) -> Result<(), PolicyError> {
        self.keep(true, true).await
    }

    async fn on_cleared(&self) -> Result<(), PolicyError> {
        self.keep(false, false).await
    }
}
