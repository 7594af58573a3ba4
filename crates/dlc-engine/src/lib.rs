#![warn(missing_docs)]
//! # dlc-engine — Enforcement and Scheduling Engine
//!
//! Drives the device lock and provisioning machines defined in `dlc-state`
//! against the outside world.
//!
//! ## Components
//!
//! - [`controller`]: one exclusive-section controller per machine. Commits
//!   state durably, then enforces policies, then notifies observers.
//! - [`policy`]: the ordered handler chain and the generation bookkeeping
//!   that makes enforcement run once per applied transition.
//! - [`critical`]: the mandatory-reset recovery path for failed enforcement.
//! - [`scheduler`]: persistent one-shot alarms that survive reboots and
//!   clock changes.
//! - [`finalization`]: the single-worker queue that walks the device out of
//!   the program.
//! - [`engine`]: assembly, boot and wake entry points.
//!
//! ## External Boundaries
//!
//! Every OS-facing concern is an async trait: [`store::ParameterStore`],
//! [`timer::OsTimer`], [`work::UniqueWorkDispatcher`],
//! [`policy::DevicePolicyPort`]. In-memory implementations for tests live
//! in `mock`, compiled for this crate's tests and behind the `test-support`
//! feature.
//!
//! ## Crate Policy
//!
//! - No lock is held across a call into an observer.
//! - No `.unwrap()` outside tests.

pub mod config;
pub mod controller;
pub mod critical;
pub mod engine;
pub mod error;
pub mod finalization;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod observer;
pub mod policy;
pub mod scheduler;
pub mod store;
pub mod timer;
pub mod work;

pub use config::{ConfigError, EngineConfig, SchedulerDelays};
pub use controller::{
    DeviceStateController, ProvisionStateController, StateController, TransitionHook,
};
pub use critical::{CriticalFailureHandler, CriticalOutcome};
pub use engine::{BootReport, DeviceLockEngine, DeviceLockEngineBuilder, EngineStatus, WakeAction};
pub use error::{
    DispatchError, EngineError, ObserverError, PolicyError, StoreError, TimerError,
};
pub use finalization::FinalizationController;
pub use observer::{ObserverId, ObserverRegistry, StateObserver};
pub use policy::{DevicePolicyPort, EnforcementOutcome, PolicyEngine, PolicyHandler};
pub use scheduler::TimerScheduler;
pub use store::{JsonFileParameterStore, MemoryParameterStore, ParameterStore};
pub use timer::{OsTimer, TokioTimer, WakeToken};
pub use work::{EnqueueOutcome, ExistingWorkPolicy, UniqueWorkDispatcher, WorkKind, WorkRequest};
