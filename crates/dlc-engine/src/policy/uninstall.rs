use std::sync::Arc;

use async_trait::async_trait;

use dlc_core::PackageName;

use super::{DevicePolicyPort, PolicyHandler};
use crate::config::EngineConfig;
use crate::error::PolicyError;

/// Blocks uninstalling the kiosk app for as long as it may be needed.
pub struct PackageUninstallBlockPolicyHandler {
    port: Arc<dyn DevicePolicyPort>,
    kiosk: PackageName,
}

impl PackageUninstallBlockPolicyHandler {
    /// Handler for the configured kiosk package.
    pub fn new(port: Arc<dyn DevicePolicyPort>, config: &EngineConfig) -> Self {
        Self {
            port,
            kiosk: config.kiosk_package.clone(),
        }
    }

    async fn block(&self, blocked: bool) -> Result<(), PolicyError> {
        self.port.set_uninstall_blocked(&self.kiosk, blocked).await
    }
}

#[async_trait]
impl PolicyHandler for PackageUninstallBlockPolicyHandler {
    fn name(&self) -> &'static str {
        "uninstall_block"
    }

    async fn on_provision_in_progress(&self) -> Result<(), PolicyError> {
        self.block(true).await
    }

    async fn on_provisioned(&self) -> Result<(), PolicyError> {
        self.block(true).await
    }

    async fn on_provision_paused(&self) -> Result<(), PolicyError> {
        self.block(true).await
    }

    async fn on_provision_failed(&self) -> Result<(), PolicyError> {
        self.block(false).await
    }

    async fn on_locked(&self) -> Result<(), PolicyError> {
        self.block(true).await
    }

    async fn on_unlocked(&self) -> Result<(), PolicyError> {
        self.block(true).await
    }

    async fn on_cleared(&self) -> Result<(), PolicyError> {
        self.block(false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingPolicyPort;

    #[tokio::test]
    async fn blocked_while_enrolled_released_on_clear() {
        let port = Arc::new(RecordingPolicyPort::new());
        let cfg = EngineConfig::defaults().unwrap();
        let h = PackageUninstallBlockPolicyHandler::new(port.clone(), &cfg);

        h.on_locked().await.unwrap();
        assert_eq!(port.snapshot().uninstall_blocked.get(&cfg.kiosk_package), Some(&true));
        h.on_cleared().await.unwrap();
        assert_eq!(port.snapshot().uninstall_blocked.get(&cfg.kiosk_package), Some(&false));
    }
}
