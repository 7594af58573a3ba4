#![deny(missing_docs)]
//! # dlc-core — Foundational Types for the Device Lock Controller
//!
//! Defines the primitives every other `dlc-*` crate builds on. It depends on
//! nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Millisecond wall-clock timestamps as a newtype.** Scheduler targets
//!    are persisted as `i64` epoch milliseconds; `EpochMillis` keeps them from
//!    being confused with durations or monotonic readings, and `0` is the
//!    reserved "unset" value.
//!
//! 2. **Injected clocks.** Nothing reads the system time directly. The
//!    [`Clock`] trait exposes both wall-clock and monotonic time so clock
//!    jumps can be detected by comparing the two.
//!
//! 3. **Validated identifiers.** `PackageName` and `WorkName` reject empty or
//!    malformed input at construction.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `dlc-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod error;
pub mod identity;
pub mod temporal;

pub use error::ValidationError;
pub use identity::{
    PackageName, WorkName, WorkNameRef, REPORT_DEVICE_FINALIZED_WORK, REPORT_PROVISION_STATE_WORK,
};
pub use temporal::{Clock, EpochMillis, SystemClock};
