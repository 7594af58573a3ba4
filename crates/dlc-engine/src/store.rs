//! # Durable Parameter Store
//!
//! The single source of truth for machine states, scheduler targets and
//! flags. The engine is its only writer.
//!
//! Two implementations ship with the engine:
//!
//! - [`MemoryParameterStore`]: a `parking_lot::RwLock` map. Used by tests
//!   and by embedders that persist elsewhere. Supports fault injection.
//! - [`JsonFileParameterStore`]: a single JSON document, rewritten
//!   atomically (temp file + rename) on every write, so values survive
//!   process restarts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use dlc_state::PersistedCode;

use crate::error::StoreError;

/// Well-known parameter keys.
pub mod keys {
    use dlc_state::TimerKind;

    /// Persisted [`dlc_state::DeviceState`] code.
    pub const DEVICE_STATE: &str = "device_state";
    /// Persisted [`dlc_state::ProvisionState`] code.
    pub const PROVISION_STATE: &str = "provision_state";
    /// Persisted [`dlc_state::FinalizationState`] code.
    pub const FINALIZATION_STATE: &str = "finalization_state";
    /// Set once the critical-failure path has scheduled a mandatory reset.
    pub const MANDATORY_RESET: &str = "mandatory_reset_scheduled";

    /// Key holding the expected run time of a timer kind.
    pub fn expected_run_time(kind: TimerKind) -> &'static str {
        match kind {
            TimerKind::RetryCheckIn => "expected_retry_check_in_millis",
            TimerKind::ResumeProvision => "expected_resume_provision_millis",
            TimerKind::NextProvisionFailedStep => "expected_next_provision_failed_step_millis",
            TimerKind::ResetDevice => "expected_reset_device_millis",
        }
    }
}

/// Asynchronous key/value persistence.
///
/// `Ok(None)` means the key is absent. Storage faults are `Err`.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Read a 32-bit integer.
    async fn get_int(&self, key: &str) -> Result<Option<i32>, StoreError>;
    /// Write a 32-bit integer.
    async fn set_int(&self, key: &str, value: i32) -> Result<(), StoreError>;
    /// Read a 64-bit integer.
    async fn get_long(&self, key: &str) -> Result<Option<i64>, StoreError>;
    /// Write a 64-bit integer.
    async fn set_long(&self, key: &str, value: i64) -> Result<(), StoreError>;
    /// Read a boolean.
    async fn get_bool(&self, key: &str) -> Result<Option<bool>, StoreError>;
    /// Write a boolean.
    async fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError>;
    /// Remove every key.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// A typed stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum StoredValue {
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// Boolean.
    Bool(bool),
}

impl StoredValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Bool(_) => "bool",
        }
    }
}

fn mismatch(key: &str, expected: &'static str, found: &StoredValue) -> StoreError {
    StoreError::TypeMismatch {
        key: key.to_string(),
        expected,
        found: found.type_name(),
    }
}

fn as_int(key: &str, value: Option<StoredValue>) -> Result<Option<i32>, StoreError> {
    match value {
        None => Ok(None),
        Some(StoredValue::Int(v)) => Ok(Some(v)),
        Some(other) => Err(mismatch(key, "int", &other)),
    }
}

fn as_long(key: &str, value: Option<StoredValue>) -> Result<Option<i64>, StoreError> {
    match value {
        None => Ok(None),
        Some(StoredValue::Long(v)) => Ok(Some(v)),
        Some(other) => Err(mismatch(key, "long", &other)),
    }
}

fn as_bool(key: &str, value: Option<StoredValue>) -> Result<Option<bool>, StoreError> {
    match value {
        None => Ok(None),
        Some(StoredValue::Bool(v)) => Ok(Some(v)),
        Some(other) => Err(mismatch(key, "bool", &other)),
    }
}

// -- Lenient readers ----------------------------------------------------------

/// Read a long, logging faults and falling back to `default`.
pub(crate) async fn long_or(store: &dyn ParameterStore, key: &str, default: i64) -> i64 {
    match store.get_long(key).await {
        Ok(value) => value.unwrap_or(default),
        Err(e) => {
            tracing::warn!(key, error = %e, "parameter read failed; using default");
            default
        }
    }
}

/// Read a bool, logging faults and falling back to `default`.
pub(crate) async fn bool_or(store: &dyn ParameterStore, key: &str, default: bool) -> bool {
    match store.get_bool(key).await {
        Ok(value) => value.unwrap_or(default),
        Err(e) => {
            tracing::warn!(key, error = %e, "parameter read failed; using default");
            default
        }
    }
}

/// Read a persisted enum strictly: absent → `default`, faults and unknown
/// codes → `Err`.
pub(crate) async fn read_code<S: PersistedCode>(
    store: &dyn ParameterStore,
    key: &str,
    default: S,
) -> Result<S, StoreError> {
    match store.get_int(key).await? {
        None => Ok(default),
        Some(code) => S::from_code(code).ok_or_else(|| StoreError::Read {
            key: key.to_string(),
            reason: format!("unknown code {code}"),
        }),
    }
}

/// Read a persisted enum leniently: any fault is logged and read as `default`.
pub(crate) async fn code_or<S: PersistedCode>(
    store: &dyn ParameterStore,
    key: &str,
    default: S,
) -> S {
    match read_code(store, key, default).await {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(key, error = %e, "state read failed; using default");
            default
        }
    }
}

// -- In-memory store -----------------------------------------------------------

/// Thread-safe in-memory store.
///
/// All operations are synchronous under the hood (the lock is `parking_lot`,
/// never held across `.await`).
#[derive(Debug, Default)]
pub struct MemoryParameterStore {
    data: RwLock<BTreeMap<String, StoredValue>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryParameterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read fail until turned off.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail until turned off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of the current contents.
    pub fn snapshot(&self) -> BTreeMap<String, StoredValue> {
        self.data.read().clone()
    }

    fn read(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Read {
                key: key.to_string(),
                reason: "injected read fault".to_string(),
            });
        }
        Ok(self.data.read().get(key).copied())
    }

    fn write(&self, key: &str, value: StoredValue) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write {
                key: key.to_string(),
                reason: "injected write fault".to_string(),
            });
        }
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }
}

#[async_trait]
impl ParameterStore for MemoryParameterStore {
    async fn get_int(&self, key: &str) -> Result<Option<i32>, StoreError> {
        as_int(key, self.read(key)?)
    }

    async fn set_int(&self, key: &str, value: i32) -> Result<(), StoreError> {
        self.write(key, StoredValue::Int(value))
    }

    async fn get_long(&self, key: &str) -> Result<Option<i64>, StoreError> {
        as_long(key, self.read(key)?)
    }

    async fn set_long(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.write(key, StoredValue::Long(value))
    }

    async fn get_bool(&self, key: &str) -> Result<Option<bool>, StoreError> {
        as_bool(key, self.read(key)?)
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.write(key, StoredValue::Bool(value))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write {
                key: "*".to_string(),
                reason: "injected write fault".to_string(),
            });
        }
        self.data.write().clear();
        Ok(())
    }
}

// -- JSON file store -----------------------------------------------------------

/// On-disk document layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ParameterDocument {
    updated_at: DateTime<Utc>,
    values: BTreeMap<String, StoredValue>,
}

/// File-backed store holding one JSON document.
///
/// Writes are serialized by an async mutex and land atomically: the
/// document is written to a sibling temp file and renamed over the
/// original.
#[derive(Debug)]
pub struct JsonFileParameterStore {
    path: PathBuf,
    values: tokio::sync::Mutex<BTreeMap<String, StoredValue>>,
}

impl JsonFileParameterStore {
    /// Open the store at `path`, loading the existing document if present.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let values = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let doc: ParameterDocument = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?;
                doc.values
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(StoreError::Read {
                    key: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };
        tracing::debug!(path = %path.display(), entries = values.len(), "parameter store opened");
        Ok(Self {
            path,
            values: tokio::sync::Mutex::new(values),
        })
    }

    /// Location of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, key: &str, values: &BTreeMap<String, StoredValue>) -> Result<(), StoreError> {
        let doc = ParameterDocument {
            updated_at: Utc::now(),
            values: values.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&doc)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let write_err = |e: std::io::Error| StoreError::Write {
            key: key.to_string(),
            reason: e.to_string(),
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)?;
        Ok(())
    }

    async fn put(&self, key: &str, value: StoredValue) -> Result<(), StoreError> {
        let mut values = self.values.lock().await;
        let previous = values.insert(key.to_string(), value);
        if let Err(e) = self.persist(key, &values).await {
            match previous {
                Some(old) => values.insert(key.to_string(), old),
                None => values.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Option<StoredValue> {
        self.values.lock().await.get(key).copied()
    }
}

#[async_trait]
impl ParameterStore for JsonFileParameterStore {
    async fn get_int(&self, key: &str) -> Result<Option<i32>, StoreError> {
        as_int(key, self.get(key).await)
    }

    async fn set_int(&self, key: &str, value: i32) -> Result<(), StoreError> {
        self.put(key, StoredValue::Int(value)).await
    }

    async fn get_long(&self, key: &str) -> Result<Option<i64>, StoreError> {
        as_long(key, self.get(key).await)
    }

    async fn set_long(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.put(key, StoredValue::Long(value)).await
    }

    async fn get_bool(&self, key: &str) -> Result<Option<bool>, StoreError> {
        as_bool(key, self.get(key).await)
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.put(key, StoredValue::Bool(value)).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut values = self.values.lock().await;
        let previous = std::mem::take(&mut *values);
        if let Err(e) = self.persist("*", &values).await {
            *values = previous;
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlc_state::DeviceState;

    #[tokio::test]
    async fn absent_key_is_none_not_error() {
        let store = MemoryParameterStore::new();
        assert_eq!(store.get_int("missing").await.unwrap(), None);
        assert_eq!(store.get_long("missing").await.unwrap(), None);
        assert_eq!(store.get_bool("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn type_mismatch_is_reported() {
        let store = MemoryParameterStore::new();
        store.set_bool("flag", true).await.unwrap();
        let err = store.get_long("flag").await.unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { expected: "long", found: "bool", .. }));
    }

    #[tokio::test]
    async fn injected_faults_are_distinct_from_absent() {
        let store = MemoryParameterStore::new();
        store.set_long("k", 5).await.unwrap();
        store.set_fail_reads(true);
        assert!(matches!(store.get_long("k").await, Err(StoreError::Read { .. })));
        assert_eq!(long_or(&store, "k", 0).await, 0);
        store.set_fail_reads(false);
        assert_eq!(long_or(&store, "k", 0).await, 5);

        store.set_fail_writes(true);
        assert!(store.set_long("k", 6).await.is_err());
        store.set_fail_writes(false);
        assert_eq!(store.get_long("k").await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn unknown_state_code_is_a_read_fault() {
        let store = MemoryParameterStore::new();
        store.set_int(keys::DEVICE_STATE, 42).await.unwrap();
        assert!(read_code(&store, keys::DEVICE_STATE, DeviceState::Unprovisioned)
            .await
            .is_err());
        assert_eq!(
            code_or(&store, keys::DEVICE_STATE, DeviceState::Unprovisioned).await,
            DeviceState::Unprovisioned
        );
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let store = MemoryParameterStore::new();
        store.set_int("a", 1).await.unwrap();
        store.set_bool("b", true).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        {
            let store = JsonFileParameterStore::open(&path).await.unwrap();
            store.set_int(keys::DEVICE_STATE, 5).await.unwrap();
            store.set_long("expected_reset_device_millis", 1_700_000_000_000).await.unwrap();
            store.set_bool(keys::MANDATORY_RESET, true).await.unwrap();
        }
        let reopened = JsonFileParameterStore::open(&path).await.unwrap();
        assert_eq!(reopened.get_int(keys::DEVICE_STATE).await.unwrap(), Some(5));
        assert_eq!(
            reopened.get_long("expected_reset_device_millis").await.unwrap(),
            Some(1_700_000_000_000)
        );
        assert_eq!(reopened.get_bool(keys::MANDATORY_RESET).await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn json_store_rejects_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            JsonFileParameterStore::open(&path).await,
            Err(StoreError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn json_store_clear_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("params.json");
        let store = JsonFileParameterStore::open(&path).await.unwrap();
        store.set_int("a", 1).await.unwrap();
        store.clear().await.unwrap();
        let reopened = JsonFileParameterStore::open(&path).await.unwrap();
        assert_eq!(reopened.get_int("a").await.unwrap(), None);
    }

    #[test]
    fn distinct_timer_keys() {
        let mut seen: Vec<&str> = dlc_state::TimerKind::ALL
            .iter()
            .map(|k| keys::expected_run_time(*k))
            .collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), dlc_state::TimerKind::ALL.len());
    }
}
