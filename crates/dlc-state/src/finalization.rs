//! # Finalization Checkpoints
//!
//! The last, irreversible phase of a device's program. Checkpoints only move
//! forward; a request for a checkpoint at or behind the current one is a
//! no-op.

use serde::{Deserialize, Serialize};

/// Persisted finalization checkpoint. Ordered: `NotStarted < ... < Reported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalizationState {
    /// Finalization has not begun.
    #[default]
    NotStarted,
    /// All device restrictions have been removed.
    RestrictionsCleared,
    /// The finalization report has been queued.
    Reporting,
    /// The report was delivered and the controller's components are disabled.
    Reported,
}

impl FinalizationState {
    /// Every checkpoint in order.
    pub const ALL: [FinalizationState; 4] = [
        Self::NotStarted,
        Self::RestrictionsCleared,
        Self::Reporting,
        Self::Reported,
    ];

    /// The checkpoint directly after this one.
    pub fn successor(&self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::RestrictionsCleared),
            Self::RestrictionsCleared => Some(Self::Reporting),
            Self::Reporting => Some(Self::Reported),
            Self::Reported => None,
        }
    }

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::RestrictionsCleared => "RESTRICTIONS_CLEARED",
            Self::Reporting => "REPORTING",
            Self::Reported => "REPORTED",
        }
    }

    /// Whether finalization is complete.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Reported)
    }

    /// The ordered steps needed to move from this checkpoint to `target`.
    /// Empty when `target` is at or behind this checkpoint.
    pub fn steps_to(&self, target: FinalizationState) -> Vec<FinalizationState> {
        let mut steps = Vec::new();
        let mut cursor = *self;
        while cursor < target {
            match cursor.successor() {
                Some(next) => {
                    steps.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        steps
    }
}

impl std::fmt::Display for FinalizationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
