//! # dlc-cli — Device Lock Controller Command-Line Interface
//!
//! Drives a [`dlc_engine::DeviceLockEngine`] whose durable state lives in a
//! JSON document under a state directory. Each invocation is one process
//! lifetime: the engine is assembled, one command runs, the process exits.
//!
//! ## Subcommands
//!
//! - `status`: machine states, category, finalization, timers
//! - `device <event>` / `provision <event>`: inject a state machine event
//! - `enforce`: re-apply the current policy category
//! - `boot`: run the process-start sequence
//! - `wake <kind>`: deliver a fired timer
//! - `time-changed`: correct timers after a wall-clock change
//! - `finalize cleared|finalized`: drive the finalization queue
//! - `schedule <kind>`: arm a timer
//!
//! ## Crate Policy
//!
//! - Argument parsing lives here; behavior lives in `dlc-engine`.
//! - OS boundaries are logging stand-ins (see [`ports`]).

pub mod commands;
pub mod ports;
pub mod runtime;
