//! # Error Types
//!
//! Errors raised while constructing foundational values. Engine-level
//! failures (storage, timers, dispatch) live in `dlc-engine`; transition
//! rejections live in `dlc-state`.

use thiserror::Error;

/// A value failed validation at construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// An identifier was empty after trimming.
    #[error("{kind} must not be empty")]
    Empty {
        /// Which identifier kind was rejected.
        kind: &'static str,
    },

    /// An identifier contained characters outside its allowed alphabet.
    #[error("invalid {kind} {value:?}: {reason}")]
    Malformed {
        /// Which identifier kind was rejected.
        kind: &'static str,
        /// The offending input.
        value: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A timestamp fell outside the representable range.
    #[error("timestamp out of range: {0} ms")]
    TimestampOutOfRange(i64),
}
