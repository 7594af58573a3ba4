//! Subcommand definitions and their handlers.
//!
//! Every handler prints one JSON document to stdout and returns the
//! process exit code.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Subcommand, ValueEnum};
use serde_json::json;

use dlc_engine::{DeviceLockEngine, WakeToken};
use dlc_state::{DeviceEvent, ProvisionEvent, TimerKind};

use crate::runtime::open_engine;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show machine states, enforcement category, finalization and timers.
    Status,

    /// Apply a device lock event (e.g. lock-device, clear).
    Device {
        #[arg(value_parser = parse_device_event)]
        event: DeviceEvent,
    },

    /// Apply a provisioning event (e.g. provision-ready, provision-pause).
    Provision {
        #[arg(value_parser = parse_provision_event)]
        event: ProvisionEvent,
    },

    /// Re-apply the policies of the current state.
    Enforce,

    /// Run the process-start sequence.
    Boot,

    /// Deliver a fired timer.
    Wake {
        #[arg(value_parser = parse_timer_kind)]
        kind: TimerKind,
    },

    /// Correct timer targets after a wall-clock change.
    TimeChanged,

    /// Drive the finalization queue.
    Finalize {
        #[arg(value_enum)]
        step: FinalizeStep,
    },

    /// Schedule a timer. Kinds other than retry-check-in default to their
    /// policy delay.
    Schedule {
        #[arg(value_parser = parse_timer_kind)]
        kind: TimerKind,
        /// Delay in milliseconds.
        #[arg(long)]
        delay_ms: Option<u64>,
        /// Use the mandatory reset delay (reset-device only).
        #[arg(long)]
        mandatory: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeStep {
    /// Device restrictions were cleared.
    Cleared,
    /// The server acknowledged the finalization report.
    Finalized,
}

pub fn parse_device_event(raw: &str) -> Result<DeviceEvent, String> {
    DeviceEvent::from_name(&raw.replace('-', "_"))
        .ok_or_else(|| format!("unknown device event '{raw}'"))
}

pub fn parse_provision_event(raw: &str) -> Result<ProvisionEvent, String> {
    ProvisionEvent::from_name(&raw.replace('-', "_"))
        .ok_or_else(|| format!("unknown provision event '{raw}'"))
}

pub fn parse_timer_kind(raw: &str) -> Result<TimerKind, String> {
    TimerKind::from_name(raw).ok_or_else(|| format!("unknown timer kind '{raw}'"))
}

/// Assemble the engine under `state_dir` and run `command`.
pub async fn run(command: Command, state_dir: &Path) -> Result<u8> {
    let engine = open_engine(state_dir).await?;
    let (output, code) = execute(&engine, command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(code)
}

/// Run `command` against an assembled engine. Returns the JSON output and
/// the exit code.
pub async fn execute(engine: &DeviceLockEngine, command: Command) -> Result<(serde_json::Value, u8)> {
    let output = match command {
        Command::Status => serde_json::to_value(engine.status().await?)?,
        Command::Device { event } => {
            let state = engine.device().set_next_state_for_event(event).await?;
            json!({ "event": event.as_str(), "device_state": state })
        }
        Command::Provision { event } => {
            let state = engine.provision().set_next_state_for_event(event).await?;
            json!({ "event": event.as_str(), "provision_state": state })
        }
        Command::Enforce => {
            let enforced = engine.enforce_current_policies().await?;
            let code = if enforced { 0 } else { 2 };
            return Ok((json!({ "enforced": enforced }), code));
        }
        Command::Boot => serde_json::to_value(engine.on_boot().await?)?,
        Command::Wake { kind } => serde_json::to_value(engine.on_wake(WakeToken(kind)).await?)?,
        Command::TimeChanged => json!({ "delta_ms": engine.notify_time_changed().await }),
        Command::Finalize { step } => {
            let finalization = engine.finalization();
            let state = match step {
                FinalizeStep::Cleared => finalization.notify_restrictions_cleared().await?,
                FinalizeStep::Finalized => {
                    finalization
                        .notify_restrictions_cleared_and_finalized()
                        .await?
                }
            };
            json!({ "finalization": state })
        }
        Command::Schedule {
            kind,
            delay_ms,
            mandatory,
        } => {
            let target = schedule(engine, kind, delay_ms, mandatory).await?;
            json!({ "timer": kind, "expected_run_epoch_millis": target.as_millis() })
        }
    };
    Ok((output, 0))
}

async fn schedule(
    engine: &DeviceLockEngine,
    kind: TimerKind,
    delay_ms: Option<u64>,
    mandatory: bool,
) -> Result<dlc_core::EpochMillis> {
    let scheduler = engine.scheduler();
    if mandatory && kind != TimerKind::ResetDevice {
        bail!("--mandatory only applies to reset-device");
    }
    if let Some(ms) = delay_ms {
        return Ok(scheduler.schedule(kind, Duration::from_millis(ms)).await);
    }
    let target = match kind {
        TimerKind::RetryCheckIn => bail!("retry-check-in needs --delay-ms"),
        TimerKind::ResumeProvision => scheduler.schedule_resume_provision_alarm().await,
        TimerKind::NextProvisionFailedStep => {
            scheduler.schedule_next_provision_failed_step_alarm().await
        }
        TimerKind::ResetDevice if mandatory => {
            scheduler.schedule_mandatory_reset_device_alarm().await
        }
        TimerKind::ResetDevice => scheduler.schedule_reset_device_alarm().await,
    };
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlc_state::{DeviceState, FinalizationState};

    #[test]
    fn event_names_accept_dashes_and_case() {
        assert_eq!(parse_device_event("lock-device"), Ok(DeviceEvent::LockDevice));
        assert_eq!(parse_device_event("CLEAR"), Ok(DeviceEvent::Clear));
        assert_eq!(
            parse_provision_event("provision-pause"),
            Ok(ProvisionEvent::ProvisionPause)
        );
        assert!(parse_device_event("explode").is_err());
    }

    #[test]
    fn timer_kinds_parse() {
        assert_eq!(parse_timer_kind("reset-device"), Ok(TimerKind::ResetDevice));
        assert!(parse_timer_kind("never").is_err());
    }

    #[tokio::test]
    async fn state_persists_across_invocations() {
        let dir = tempfile::tempdir().unwrap();

        let engine = open_engine(dir.path()).await.unwrap();
        let (out, code) = execute(&engine, Command::Device { event: DeviceEvent::LockDevice })
            .await
            .unwrap();
        assert_eq!(code, 0);
        assert_eq!(out["device_state"], serde_json::to_value(DeviceState::PseudoLocked).unwrap());
        drop(engine);

        let engine = open_engine(dir.path()).await.unwrap();
        let (status, _) = execute(&engine, Command::Status).await.unwrap();
        assert_eq!(status["device_state"], serde_json::to_value(DeviceState::PseudoLocked).unwrap());
    }

    #[tokio::test]
    async fn rejected_event_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(dir.path()).await.unwrap();
        assert!(execute(&engine, Command::Device { event: DeviceEvent::SetupComplete })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn retry_schedule_requires_delay() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(dir.path()).await.unwrap();
        let cmd = Command::Schedule {
            kind: TimerKind::RetryCheckIn,
            delay_ms: None,
            mandatory: false,
        };
        assert!(execute(&engine, cmd).await.is_err());
    }

    #[tokio::test]
    async fn finalize_reports_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(dir.path()).await.unwrap();
        let (out, _) = execute(&engine, Command::Finalize { step: FinalizeStep::Finalized })
            .await
            .unwrap();
        assert_eq!(
            out["finalization"],
            serde_json::to_value(FinalizationState::Reported).unwrap()
        );
    }
}
