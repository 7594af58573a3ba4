//! State-change observers.
//!
//! Observers are notified after a transition has been committed and its
//! policies enforced. The registry keeps a copy-on-write snapshot so
//! notification never holds the registry lock while an observer runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::ObserverError;

/// Callback for committed state changes.
#[async_trait]
pub trait StateObserver<S>: Send + Sync {
    /// Called with the new state. Errors are logged and never propagated.
    async fn on_state_changed(&self, state: S) -> Result<(), ObserverError>;
}

/// Handle returned by [`ObserverRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Entries<S> = Arc<Vec<(ObserverId, Arc<dyn StateObserver<S>>)>>;

/// Ordered observer list.
pub struct ObserverRegistry<S> {
    entries: RwLock<Entries<S>>,
    next_id: AtomicU64,
}

impl<S> Default for ObserverRegistry<S> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<S: Copy + std::fmt::Display + Send + 'static> ObserverRegistry<S> {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer` at the end of the notification order.
    pub fn add(&self, observer: Arc<dyn StateObserver<S>>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries.write();
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend(entries.iter().cloned());
        next.push((id, observer));
        *entries = Arc::new(next);
        id
    }

    /// Remove a registered observer. Returns `false` if `id` is unknown.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut entries = self.entries.write();
        if !entries.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next: Vec<_> = entries
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *entries = Arc::new(next);
        true
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// `true` with no observers registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Notify every observer in registration order.
    pub async fn notify(&self, state: S) {
        let snapshot = Arc::clone(&self.entries.read());
        for (id, observer) in snapshot.iter() {
            if let Err(e) = observer.on_state_changed(state).await {
                tracing::warn!(observer = id.0, state = %state, error = %e, "observer failed");
            }
        }
    }
}
