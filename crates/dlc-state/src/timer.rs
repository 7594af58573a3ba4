//! # Scheduler Timer Kinds
//!
//! Each kind has at most one live timer. Its persisted target is an
//! [`EpochMillis`]; the unset value means no timer is scheduled.

use serde::{Deserialize, Serialize};

use dlc_core::EpochMillis;

/// The kinds of persistent timers the scheduler manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Retry the check-in RPC.
    RetryCheckIn,
    /// Resume paused provisioning.
    ResumeProvision,
    /// Advance the provisioning-failed flow by one step.
    NextProvisionFailedStep,
    /// Reset the device.
    ResetDevice,
}

impl TimerKind {
    /// Every kind.
    pub const ALL: [TimerKind; 4] = [
        Self::RetryCheckIn,
        Self::ResumeProvision,
        Self::NextProvisionFailedStep,
        Self::ResetDevice,
    ];

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetryCheckIn => "retry_check_in",
            Self::ResumeProvision => "resume_provision",
            Self::NextProvisionFailedStep => "next_provision_failed_step",
            Self::ResetDevice => "reset_device",
        }
    }

    /// Parse a canonical name.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(&normalized))
    }
}

impl std::fmt::Display for TimerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted timer target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTimer {
    /// Which timer.
    pub kind: TimerKind,
    /// When it is expected to fire. Unset means not scheduled.
    pub expected_run_epoch_millis: EpochMillis,
}

impl ScheduledTimer {
    /// Whether a timer is actually scheduled.
    pub fn is_scheduled(&self) -> bool {
        !self.expected_run_epoch_millis.is_unset()
    }
}
