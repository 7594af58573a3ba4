//! # Policy Handlers and the Enforcement Pipeline
//!
//! A [`PolicyHandler`] owns one concern (app-ops exemptions, lock-task
//! allowlist, user restrictions, uninstall blocking, role grants,
//! keep-alive) and exposes one method per [`EnforcementCategory`]. Every
//! method is a set operation: calling it twice applies the same end state.
//!
//! Handlers never see machine states. The [`PolicyEngine`] derives the
//! category and runs the chain in declaration order.
//!
//! Handlers reach the OS only through [`DevicePolicyPort`].

mod app_ops;
mod engine;
mod keep_alive;
mod lock_task;
mod restrictions;
mod role;
mod uninstall;

pub use app_ops::AppOpsPolicyHandler;
pub use engine::{EnforcementOutcome, PolicyEngine};
pub use keep_alive::KeepAlivePolicyHandler;
pub use lock_task::LockTaskModePolicyHandler;
pub use restrictions::UserRestrictionsPolicyHandler;
pub use role::RolePolicyHandler;
pub use uninstall::PackageUninstallBlockPolicyHandler;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dlc_core::PackageName;
use dlc_state::EnforcementCategory;

use crate::config::EngineConfig;
use crate::error::PolicyError;

/// One enforcement concern. Methods default to "nothing to do".
#[async_trait]
pub trait PolicyHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Provisioning is running.
    async fn on_provision_in_progress(&self) -> Result<(), PolicyError> {
        Ok(())
    }

    /// The kiosk app is installed and being set up.
    async fn on_provisioned(&self) -> Result<(), PolicyError> {
        Ok(())
    }

    /// Provisioning was paused by the user.
    async fn on_provision_paused(&self) -> Result<(), PolicyError> {
        Ok(())
    }

    /// Provisioning failed.
    async fn on_provision_failed(&self) -> Result<(), PolicyError> {
        Ok(())
    }

    /// The device is locked.
    async fn on_locked(&self) -> Result<(), PolicyError> {
        Ok(())
    }

    /// The device is unlocked, or not yet in the program.
    async fn on_unlocked(&self) -> Result<(), PolicyError> {
        Ok(())
    }

    /// The device left the program. Undo every restriction.
    async fn on_cleared(&self) -> Result<(), PolicyError> {
        Ok(())
    }
}

/// Invoke the method of `handler` matching `category`.
pub async fn apply_category(
    handler: &dyn PolicyHandler,
    category: EnforcementCategory,
) -> Result<(), PolicyError> {
    match category {
        EnforcementCategory::ProvisionInProgress => handler.on_provision_in_progress().await,
        EnforcementCategory::Provisioned => handler.on_provisioned().await,
        EnforcementCategory::ProvisionPaused => handler.on_provision_paused().await,
        EnforcementCategory::ProvisionFailed => handler.on_provision_failed().await,
        EnforcementCategory::Locked => handler.on_locked().await,
        EnforcementCategory::Unlocked => handler.on_unlocked().await,
        EnforcementCategory::Cleared => handler.on_cleared().await,
    }
}

/// OS user restrictions the controller toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRestriction {
    /// Booting into safe mode.
    DisallowSafeBoot,
    /// Changing date and time.
    DisallowConfigDateTime,
    /// Developer and debugging features.
    DisallowDebuggingFeatures,
    /// Factory reset from settings.
    DisallowFactoryReset,
    /// Adding users.
    DisallowAddUser,
    /// Installing apps from unknown sources.
    DisallowInstallUnknownSources,
    /// Uninstalling apps.
    DisallowUninstallApps,
    /// Installing apps.
    DisallowInstallApps,
}

impl UserRestriction {
    /// Every restriction the controller manages.
    pub const ALL: [UserRestriction; 8] = [
        Self::DisallowSafeBoot,
        Self::DisallowConfigDateTime,
        Self::DisallowDebuggingFeatures,
        Self::DisallowFactoryReset,
        Self::DisallowAddUser,
        Self::DisallowInstallUnknownSources,
        Self::DisallowUninstallApps,
        Self::DisallowInstallApps,
    ];

    /// OS identifier of the restriction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DisallowSafeBoot => "no_safe_boot",
            Self::DisallowConfigDateTime => "no_config_date_time",
            Self::DisallowDebuggingFeatures => "no_debugging_features",
            Self::DisallowFactoryReset => "no_factory_reset",
            Self::DisallowAddUser => "no_add_user",
            Self::DisallowInstallUnknownSources => "no_install_unknown_sources",
            Self::DisallowUninstallApps => "no_uninstall_apps",
            Self::DisallowInstallApps => "no_install_apps",
        }
    }
}

impl std::fmt::Display for UserRestriction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// System UI features available inside lock-task mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockTaskFeature {
    /// Status bar system info.
    SystemInfo,
    /// Notifications.
    Notifications,
    /// Home button.
    Home,
    /// Power-button global actions.
    GlobalActions,
    /// Keyguard.
    Keyguard,
}

/// The OS device-policy facade.
///
/// Every method is an idempotent "set to" operation.
#[async_trait]
pub trait DevicePolicyPort: Send + Sync {
    /// Exempt `package` from background and hibernation restrictions.
    async fn set_app_op_exemption(&self, package: &PackageName, exempt: bool)
        -> Result<(), PolicyError>;

    /// Replace the lock-task allowlist. An empty list exits lock-task mode.
    async fn set_lock_task_packages(&self, packages: &[PackageName]) -> Result<(), PolicyError>;

    /// Replace the set of lock-task features.
    async fn set_lock_task_features(&self, features: &[LockTaskFeature])
        -> Result<(), PolicyError>;

    /// Enable or disable a user restriction.
    async fn set_user_restriction(
        &self,
        restriction: UserRestriction,
        enabled: bool,
    ) -> Result<(), PolicyError>;

    /// Block or allow uninstalling `package`.
    async fn set_uninstall_blocked(&self, package: &PackageName, blocked: bool)
        -> Result<(), PolicyError>;

    /// Grant or revoke `role` for `package`.
    async fn set_role_holder(
        &self,
        role: &str,
        package: &PackageName,
        held: bool,
    ) -> Result<(), PolicyError>;

    /// Keep `package` alive (exempt from process killing) or release it.
    async fn set_keep_alive(&self, package: &PackageName, enabled: bool)
        -> Result<(), PolicyError>;

    /// Enable or disable an application component.
    async fn set_component_enabled(&self, component: &str, enabled: bool)
        -> Result<(), PolicyError>;
}

/// Build the handler chain in declaration order.
pub fn default_handlers(
    port: Arc<dyn DevicePolicyPort>,
    config: &EngineConfig,
) -> Vec<Arc<dyn PolicyHandler>> {
    vec![
        Arc::new(AppOpsPolicyHandler::new(Arc::clone(&port), config)),
        Arc::new(LockTaskModePolicyHandler::new(Arc::clone(&port), config)),
        Arc::new(UserRestrictionsPolicyHandler::new(Arc::clone(&port))),
        Arc::new(PackageUninstallBlockPolicyHandler::new(Arc::clone(&port), config)),
        Arc::new(RolePolicyHandler::new(Arc::clone(&port), config)),
        Arc::new(KeepAlivePolicyHandler::new(port, config)),
    ]
}
