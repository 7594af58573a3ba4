//! Engine assembly for one CLI invocation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use dlc_engine::{DeviceLockEngine, EngineConfig, JsonFileParameterStore};

use crate::ports::{LoggingPolicyPort, LoggingTimer, LoggingWorkDispatcher};

/// File holding the durable parameters inside the state directory.
pub const PARAMETER_FILE: &str = "parameters.json";

pub fn parameter_path(state_dir: &Path) -> PathBuf {
    state_dir.join(PARAMETER_FILE)
}

/// Open the parameter store under `state_dir` and assemble an engine.
pub async fn open_engine(state_dir: &Path) -> Result<DeviceLockEngine> {
    tokio::fs::create_dir_all(state_dir)
        .await
        .with_context(|| format!("failed to create state directory {}", state_dir.display()))?;

    let path = parameter_path(state_dir);
    let store = JsonFileParameterStore::open(&path)
        .await
        .with_context(|| format!("failed to open parameter store {}", path.display()))?;
    let config = EngineConfig::from_env().context("invalid DLC_* configuration")?;

    tracing::debug!(store = %path.display(), "opening engine");
    let engine = DeviceLockEngine::builder()
        .store(Arc::new(store))
        .timer(Arc::new(LoggingTimer))
        .dispatcher(Arc::new(LoggingWorkDispatcher::default()))
        .policy_port(Arc::new(LoggingPolicyPort))
        .config(config)
        .build()?;
    Ok(engine)
}
