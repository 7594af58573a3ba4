//! OS user restrictions.
//!
//! Each category maps to a fixed restriction set. Applying a category
//! enables its set and disables every other managed restriction, so the
//! result never depends on what was applied before.

use std::sync::Arc;

use async_trait::async_trait;

use dlc_state::EnforcementCategory;

use super::{DevicePolicyPort, PolicyHandler, UserRestriction};
use crate::error::PolicyError;

const PROVISIONING: &[UserRestriction] = &[
    UserRestriction::DisallowSafeBoot,
    UserRestriction::DisallowConfigDateTime,
];

const PROVISIONED: &[UserRestriction] = &[
    UserRestriction::DisallowSafeBoot,
    UserRestriction::DisallowConfigDateTime,
    UserRestriction::DisallowDebuggingFeatures,
    UserRestriction::DisallowFactoryReset,
];

const LOCKED: &[UserRestriction] = &[
    UserRestriction::DisallowSafeBoot,
    UserRestriction::DisallowConfigDateTime,
    UserRestriction::DisallowDebuggingFeatures,
    UserRestriction::DisallowFactoryReset,
    UserRestriction::DisallowAddUser,
    UserRestriction::DisallowInstallUnknownSources,
    UserRestriction::DisallowUninstallApps,
    UserRestriction::DisallowInstallApps,
];

/// The restriction set enforced for `category`.
pub fn restrictions_for(category: EnforcementCategory) -> &'static [UserRestriction] {
    match category {
        EnforcementCategory::ProvisionInProgress | EnforcementCategory::ProvisionPaused => {
            PROVISIONING
        }
        EnforcementCategory::Provisioned | EnforcementCategory::Unlocked => PROVISIONED,
        EnforcementCategory::Locked => LOCKED,
        EnforcementCategory::ProvisionFailed | EnforcementCategory::Cleared => &[],
    }
}

/// Applies per-category restriction sets.
pub struct UserRestrictionsPolicyHandler {
    port: Arc<dyn DevicePolicyPort>,
}

impl UserRestrictionsPolicyHandler {
    /// Handler applying the static restriction tables.
    pub fn new(port: Arc<dyn DevicePolicyPort>) -> Self {
        Self { port }
    }

    async fn apply(&self, category: EnforcementCategory) -> Result<(), PolicyError> {
        let wanted = restrictions_for(category);
        for restriction in UserRestriction::ALL {
            self.port
                .set_user_restriction(restriction, wanted.contains(&restriction))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyHandler for UserRestrictionsPolicyHandler {
    fn name(&self) -> &'static str {
        "user_restrictions"
    }

    async fn on_provision_in_progress(&self) -> Result<(), PolicyError> {
        self.apply(EnforcementCategory::ProvisionInProgress).await
    }

    async fn on_provisioned(&self) -> Result<(), PolicyError> {
        self.apply(EnforcementCategory::Provisioned).await
    }

    async fn on_provision_paused(&self) -> Result<(), PolicyError> {
        self.apply(EnforcementCategory::ProvisionPaused).await
    }

    async fn on_provision_failed(&self) -> Result<(), PolicyError> {
        self.apply(EnforcementCategory::ProvisionFailed).await
    }

    async fn on_locked(&self) -> Result<(), PolicyError> {
        self.apply(EnforcementCategory::Locked).await
    }

    async fn on_unlocked(&self) -> Result<(), PolicyError> {
        self.apply(EnforcementCategory::Unlocked).await
    }

    async fn on_cleared(&self) -> Result<(), PolicyError> {
        self.apply(EnforcementCategory::Cleared).await
    }
}
