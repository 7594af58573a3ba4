//! # Unique-Work Dispatch Boundary
//!
//! Background jobs (provisioning-state reports, the finalization report) are
//! handed to an external work manager that guarantees at most one live
//! instance per [`WorkName`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dlc_core::{EpochMillis, WorkName};
use dlc_state::{DeviceState, EnforcementCategory, ProvisionState};

use crate::error::DispatchError;

/// What to do when work with the same name is already live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingWorkPolicy {
    /// Keep the live instance; drop the new request.
    Keep,
    /// Cancel the live instance and run the new request.
    Replace,
}

/// Payload of a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkKind {
    /// Report provisioning state to the server after a critical failure.
    ReportProvisionState {
        /// Provisioning state at the time of failure.
        provision_state: ProvisionState,
        /// Device state at the time of failure.
        device_state: DeviceState,
        /// Category whose enforcement failed.
        failed_category: EnforcementCategory,
    },
    /// Report that the device finished its program.
    ReportDeviceFinalized,
}

/// A unit of work handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRequest {
    /// Unique id of this request.
    pub id: Uuid,
    /// Payload.
    pub kind: WorkKind,
    /// When the request was created.
    pub created_at: EpochMillis,
}

impl WorkRequest {
    /// Create a request for `kind`, stamped at `created_at`.
    pub fn new(kind: WorkKind, created_at: EpochMillis) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            created_at,
        }
    }
}

/// Result of an enqueue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The request was queued.
    Enqueued,
    /// A live instance with the same name was kept; the request was dropped.
    KeptExisting,
}

/// External work manager.
#[async_trait]
pub trait UniqueWorkDispatcher: Send + Sync {
    /// Enqueue `request` under `name`, honoring `policy` if `name` is live.
    async fn enqueue_unique(
        &self,
        name: WorkName,
        policy: ExistingWorkPolicy,
        request: WorkRequest,
    ) -> Result<EnqueueOutcome, DispatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_kind_serializes_with_tag() {
        let kind = WorkKind::ReportProvisionState {
            provision_state: ProvisionState::ProvisionInProgress,
            device_state: DeviceState::Unprovisioned,
            failed_category: EnforcementCategory::ProvisionInProgress,
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "report_provision_state");
        assert_eq!(json["provision_state"], "PROVISION_IN_PROGRESS");
    }

    #[test]
    fn requests_get_distinct_ids() {
        let a = WorkRequest::new(WorkKind::ReportDeviceFinalized, EpochMillis::from_millis(1));
        let b = WorkRequest::new(WorkKind::ReportDeviceFinalized, EpochMillis::from_millis(1));
        assert_ne!(a.id, b.id);
    }
}
