//! Engine configuration.
//!
//! Defaults are the production policy constants. `from_env()` lets a
//! debug or test build override individual constants; it never changes
//! the scheduling algorithm.

use std::time::Duration;

use dlc_core::PackageName;

/// Default package of the controller itself.
pub const DEFAULT_CONTROLLER_PACKAGE: &str = "com.android.devicelockcontroller";
/// Default package of the kiosk app.
pub const DEFAULT_KIOSK_PACKAGE: &str = "com.example.devicelock.kiosk";
/// Default role granted to the kiosk app.
pub const DEFAULT_KIOSK_ROLE: &str = "android.app.role.FINANCED_DEVICE_KIOSK";
/// Default component disabled once finalization is reported.
pub const DEFAULT_BOOT_RECEIVER: &str =
    "com.android.devicelockcontroller/.receivers.LockedBootCompletedReceiver";

/// How long provisioning stays paused before it resumes.
pub const PROVISION_PAUSED_DELAY: Duration = Duration::from_secs(60 * 60);
/// Interval between steps of the provisioning-failed flow.
pub const PROVISION_FAILED_STEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
/// Delay before a reset after provisioning failure.
pub const RESET_DEVICE_DELAY: Duration = Duration::from_secs(30 * 60);
/// Delay before a mandatory reset after a critical failure.
pub const MANDATORY_RESET_DEVICE_DELAY: Duration = Duration::from_secs(30 * 60);

/// Delays used by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerDelays {
    /// Resume-provision alarm delay.
    pub provision_paused: Duration,
    /// Next provisioning-failed step delay.
    pub provision_failed_step: Duration,
    /// Non-mandatory reset delay.
    pub reset_device: Duration,
    /// Mandatory reset delay.
    pub mandatory_reset_device: Duration,
}

impl Default for SchedulerDelays {
    fn default() -> Self {
        Self {
            provision_paused: PROVISION_PAUSED_DELAY,
            provision_failed_step: PROVISION_FAILED_STEP_INTERVAL,
            reset_device: RESET_DEVICE_DELAY,
            mandatory_reset_device: MANDATORY_RESET_DEVICE_DELAY,
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// The controller's own package.
    pub controller_package: PackageName,
    /// The kiosk app package.
    pub kiosk_package: PackageName,
    /// Role granted to the kiosk app while provisioned.
    pub kiosk_role: String,
    /// Component disabled when finalization is reported.
    pub boot_receiver_component: String,
    /// Scheduler delays.
    pub delays: SchedulerDelays,
}

impl EngineConfig {
    /// Production defaults.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in constants; returns `ConfigError` rather
    /// than panicking to keep construction total.
    pub fn defaults() -> Result<Self, ConfigError> {
        Ok(Self {
            controller_package: package("controller", DEFAULT_CONTROLLER_PACKAGE)?,
            kiosk_package: package("kiosk", DEFAULT_KIOSK_PACKAGE)?,
            kiosk_role: DEFAULT_KIOSK_ROLE.to_string(),
            boot_receiver_component: DEFAULT_BOOT_RECEIVER.to_string(),
            delays: SchedulerDelays::default(),
        })
    }

    /// Load configuration from environment variables over the defaults.
    ///
    /// Variables:
    /// - `DLC_CONTROLLER_PACKAGE`
    /// - `DLC_KIOSK_PACKAGE`
    /// - `DLC_KIOSK_ROLE`
    /// - `DLC_BOOT_RECEIVER`
    /// - `DLC_PROVISION_PAUSED_DELAY_SECS` (default: 3600)
    /// - `DLC_PROVISION_FAILED_STEP_SECS` (default: 86400)
    /// - `DLC_RESET_DEVICE_DELAY_SECS` (default: 1800)
    /// - `DLC_MANDATORY_RESET_DELAY_SECS` (default: 1800)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::defaults()?;
        if let Ok(raw) = std::env::var("DLC_CONTROLLER_PACKAGE") {
            config.controller_package = package("DLC_CONTROLLER_PACKAGE", &raw)?;
        }
        if let Ok(raw) = std::env::var("DLC_KIOSK_PACKAGE") {
            config.kiosk_package = package("DLC_KIOSK_PACKAGE", &raw)?;
        }
        if let Ok(raw) = std::env::var("DLC_KIOSK_ROLE") {
            config.kiosk_role = raw;
        }
        if let Ok(raw) = std::env::var("DLC_BOOT_RECEIVER") {
            config.boot_receiver_component = raw;
        }
        config.delays.provision_paused =
            env_secs("DLC_PROVISION_PAUSED_DELAY_SECS", config.delays.provision_paused)?;
        config.delays.provision_failed_step =
            env_secs("DLC_PROVISION_FAILED_STEP_SECS", config.delays.provision_failed_step)?;
        config.delays.reset_device =
            env_secs("DLC_RESET_DEVICE_DELAY_SECS", config.delays.reset_device)?;
        config.delays.mandatory_reset_device =
            env_secs("DLC_MANDATORY_RESET_DELAY_SECS", config.delays.mandatory_reset_device)?;
        Ok(config)
    }
}

fn package(var: &str, raw: &str) -> Result<PackageName, ConfigError> {
    PackageName::new(raw).map_err(|e| ConfigError::InvalidPackage(var.to_string(), e.to_string()))
}

fn env_secs(var: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::InvalidDuration(var.to_string(), e.to_string())),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A package variable held an invalid name: (variable, reason).
    #[error("invalid package name for {0}: {1}")]
    InvalidPackage(String, String),
    /// A delay variable was not a whole number of seconds: (variable, reason).
    #[error("invalid duration for {0}: {1}")]
    InvalidDuration(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy_constants() {
        let cfg = EngineConfig::defaults().unwrap();
        assert_eq!(cfg.delays.provision_paused, Duration::from_secs(3600));
        assert_eq!(cfg.delays.provision_failed_step, Duration::from_secs(86_400));
        assert_eq!(cfg.delays.reset_device, Duration::from_secs(1800));
        assert_eq!(cfg.delays.mandatory_reset_device, Duration::from_secs(1800));
        assert_eq!(cfg.kiosk_package.as_str(), DEFAULT_KIOSK_PACKAGE);
    }

    #[test]
    fn env_secs_uses_default_when_var_absent() {
        let d = env_secs("DLC_NONEXISTENT_VAR_12345", Duration::from_secs(7)).unwrap();
        assert_eq!(d, Duration::from_secs(7));
    }

    #[test]
    fn env_secs_rejects_garbage() {
        std::env::set_var("DLC_TEST_BAD_SECS", "soon");
        let result = env_secs("DLC_TEST_BAD_SECS", Duration::from_secs(1));
        std::env::remove_var("DLC_TEST_BAD_SECS");
        assert!(matches!(result, Err(ConfigError::InvalidDuration(..))));
    }

    #[test]
    fn env_secs_parses_override() {
        std::env::set_var("DLC_TEST_GOOD_SECS", " 90 ");
        let result = env_secs("DLC_TEST_GOOD_SECS", Duration::from_secs(1));
        std::env::remove_var("DLC_TEST_GOOD_SECS");
        assert_eq!(result.unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn invalid_package_is_rejected() {
        assert!(matches!(
            package("DLC_KIOSK_PACKAGE", "not a package"),
            Err(ConfigError::InvalidPackage(..))
        ));
    }
}
