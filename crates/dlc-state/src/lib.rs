//! # dlc-state — Device Lock Controller State Machines
//!
//! Every state and event is a closed enum and every transition is a pure
//! function over a fixed table. Exhaustiveness is checked by `match`: adding
//! a state forces every table to handle it.
//!
//! ## State Machines
//!
//! - **Device** (`device.rs`): `Unprovisioned → SetupInProgress →
//!   SetupSucceeded → KioskSetup → Locked/Unlocked → Cleared`, with the
//!   `Pseudo*` lock states used before provisioning completes.
//!
//! - **Provision** (`provision.rs`): `Unprovisioned → ProvisionInProgress →
//!   KioskProvisioned → ProvisionSucceeded`, with pause/resume and
//!   failure/retry loops.
//!
//! - **Finalization** (`finalization.rs`): strictly monotonic checkpoints
//!   `NotStarted → RestrictionsCleared → Reporting → Reported`.
//!
//! ## Coupling
//!
//! [`EnforcementCategory::derive`] maps the pair `(ProvisionState,
//! DeviceState)` to the single policy category the handler pipeline
//! applies.
//!
//! ## Persistence
//!
//! All enums persist as stable integer codes through [`PersistedCode`]. The
//! codes are part of the on-disk format and must never be renumbered.

pub mod device;
pub mod enforcement;
pub mod error;
pub mod finalization;
pub mod lifecycle;
pub mod provision;
pub mod timer;

pub use device::{DeviceEvent, DeviceState};
pub use enforcement::EnforcementCategory;
pub use error::TransitionRejected;
pub use finalization::FinalizationState;
pub use lifecycle::{DeviceLifecycle, Lifecycle, PersistedCode, ProvisionLifecycle};
pub use provision::{ProvisionEvent, ProvisionState};
pub use timer::{ScheduledTimer, TimerKind};
