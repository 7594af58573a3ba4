//! Kiosk role grant.
//!
//! The role gives the kiosk app its elevated privileges. It is granted
//! once the kiosk is provisioned and revoked when the program ends or
//! provisioning fails. In-progress and paused provisioning leave the role
//! untouched.

use std::sync::Arc;

use async_trait::async_trait;

use dlc_core::PackageName;

use super::{DevicePolicyPort, PolicyHandler};
use crate::config::EngineConfig;
use crate::error::PolicyError;

/// Grants or revokes the kiosk role.
pub struct RolePolicyHandler {
    port: Arc<dyn DevicePolicyPort>,
    role: String,
    kiosk: PackageName,
}

impl RolePolicyHandler {
    /// Handler for the kiosk role of the configured kiosk package.
    pub fn new(port: Arc<dyn DevicePolicyPort>, config: &EngineConfig) -> Self {
        Self {
            port,
            role: config.kiosk_role.clone(),
            kiosk: config.kiosk_package.clone(),
        }
    }

    async fn hold(&self, held: bool) -> Result<(), PolicyError> {
        self.port.set_role_holder(&self.role, &self.kiosk, held).await
    }
}

#[async_trait]
impl PolicyHandler for RolePolicyHandler {
    fn name(&self) -> &'static str {
        "role"
    }

    async fn on_provisioned(&self) -> Result<(), PolicyError> {
        self.hold(true).await
    }

    async fn on_provision_failed(&self) -> Result<(), PolicyError> {
        self.hold(false).await
    }

    async fn on_locked(&self) -> Result<(), PolicyError> {
        self.hold(true).await
    }

    async fn on_unlocked(&self) -> Result<(), PolicyError> {
        self.hold(true).await
    }

    async fn on_cleared(&self) -> Result<(), PolicyError> {
        self.hold(false).await
    }
}
