//! # Identifier Newtypes
//!
//! Package names and unique-work names travel through the policy port and
//! the work dispatcher. Newtypes keep one from being passed where the other
//! is expected and reject malformed values at the boundary.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// An application package name, e.g. `com.example.kiosk`.
///
/// Must contain at least two dot-separated segments of ASCII letters,
/// digits and underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageName(String);

impl PackageName {
    /// Create a validated package name.
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = s.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::Empty {
                kind: "package name",
            });
        }
        let segments: Vec<&str> = trimmed.split('.').collect();
        if segments.len() < 2 {
            return Err(ValidationError::Malformed {
                kind: "package name",
                value: raw.clone(),
                reason: "expected at least two dot-separated segments",
            });
        }
        let valid_segment = |seg: &&str| {
            !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        };
        if !segments.iter().all(valid_segment) {
            return Err(ValidationError::Malformed {
                kind: "package name",
                value: raw.clone(),
                reason: "segments may contain only ASCII letters, digits and underscores",
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Access the package name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PackageName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PackageName> for String {
    fn from(value: PackageName) -> Self {
        value.0
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a unique unit of queued work. At most one live instance per name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkName(String);

impl WorkName {
    /// Create a validated work name (non-empty, no whitespace).
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = s.into();
        if raw.is_empty() {
            return Err(ValidationError::Empty { kind: "work name" });
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(ValidationError::Malformed {
                kind: "work name",
                value: raw,
                reason: "whitespace is not allowed",
            });
        }
        Ok(Self(raw))
    }

    /// A name known at compile time to be valid.
    pub(crate) const fn from_static(s: &'static str) -> WorkNameRef {
        WorkNameRef(s)
    }

    /// Access the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A statically known work name, convertible into a [`WorkName`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkNameRef(&'static str);

impl From<WorkNameRef> for WorkName {
    fn from(value: WorkNameRef) -> Self {
        WorkName(value.0.to_string())
    }
}

/// Unique work reporting provisioning state after a critical failure.
pub const REPORT_PROVISION_STATE_WORK: WorkNameRef =
    WorkName::from_static("device-lock-report-provision-state");

/// Unique work reporting that the device finished its program.
pub const REPORT_DEVICE_FINALIZED_WORK: WorkNameRef =
    WorkName::from_static("device-lock-report-device-finalized");
