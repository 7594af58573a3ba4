//! # Engine Error Types
//!
//! One `thiserror` enum per external boundary plus the top-level
//! [`EngineError`] that controller operations return.
//!
//! ## Taxonomy
//!
//! - Rejected transitions are returned to the caller, state unchanged.
//! - Enforcement failures are returned after the critical-failure path has
//!   run. The new state stays committed.
//! - Storage faults on reads are logged and read as the default value.
//!   Faults on commits are returned.
//! - Timer arm failures are logged and never retried locally.
//! - Finalization step failures are returned and leave the checkpoint where
//!   it was.

use thiserror::Error;

use dlc_core::ValidationError;
use dlc_state::{EnforcementCategory, FinalizationState, TransitionRejected};

use crate::config::ConfigError;

/// Durable parameter store fault. Distinct from "key absent", which is `Ok(None)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Reading from the backing storage failed.
    #[error("failed to read {key}: {reason}")]
    Read {
        /// Key being read.
        key: String,
        /// Underlying cause.
        reason: String,
    },

    /// Writing to the backing storage failed (e.g. disk full).
    #[error("failed to write {key}: {reason}")]
    Write {
        /// Key being written.
        key: String,
        /// Underlying cause.
        reason: String,
    },

    /// A key holds a value of a different type than requested.
    #[error("{key} holds a {found} value, expected {expected}")]
    TypeMismatch {
        /// Key being read.
        key: String,
        /// Requested type.
        expected: &'static str,
        /// Stored type.
        found: &'static str,
    },

    /// The backing document could not be encoded or decoded.
    #[error("corrupt parameter document: {0}")]
    Corrupt(String),
}

/// The OS refused to arm a one-shot timer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to arm timer {token}: {reason}")]
pub struct TimerError {
    /// Wake token of the timer.
    pub token: String,
    /// Underlying cause.
    pub reason: String,
}

/// Unique-work dispatch failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to enqueue work {name}: {reason}")]
pub struct DispatchError {
    /// Unique work name.
    pub name: String,
    /// Underlying cause.
    pub reason: String,
}

/// A policy handler or the OS policy facade failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// An OS policy call was rejected.
    #[error("{operation} failed: {reason}")]
    Os {
        /// Which OS operation failed.
        operation: &'static str,
        /// Underlying cause.
        reason: String,
    },

    /// A handler-level failure not tied to a single OS call.
    #[error("{handler} handler failed: {reason}")]
    Handler {
        /// Handler name.
        handler: &'static str,
        /// Underlying cause.
        reason: String,
    },
}

/// An observer callback failed. Logged, never propagated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("observer failed: {0}")]
pub struct ObserverError(pub String);

/// Top-level engine error.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The event is not valid in the current state.
    #[error(transparent)]
    Transition(#[from] TransitionRejected),

    /// The durable store failed while committing.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// The new state was committed but at least one handler failed.
    #[error("policy enforcement failed for category {category}")]
    EnforcementFailed {
        /// The category that failed to apply.
        category: EnforcementCategory,
    },

    /// Timer arming failed.
    #[error("timer error: {0}")]
    Timer(#[from] TimerError),

    /// Work dispatch failed.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// The OS policy facade failed outside the handler pipeline.
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    /// A finalization step failed; the checkpoint was not advanced.
    #[error("finalization step to {step} failed: {reason}")]
    FinalizationStep {
        /// The checkpoint that was being entered.
        step: FinalizationState,
        /// Underlying cause.
        reason: String,
    },

    /// The finalization worker is gone.
    #[error("finalization queue is closed")]
    QueueClosed,

    /// Invalid identifier.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The engine builder was not given a required component.
    #[error("engine builder is missing {0}")]
    MissingComponent(&'static str),
}
