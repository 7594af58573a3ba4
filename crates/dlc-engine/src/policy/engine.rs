//! # Policy Engine
//!
//! Runs the handler chain for the category derived from the persisted
//! machine states.
//!
//! ## Generations
//!
//! Every committed transition bumps a shared generation counter while the
//! committing machine still holds its exclusive section. Enforcement is
//! recorded against the highest generation it observed before reading
//! state. A caller whose generation is already covered gets the recorded
//! outcome instead of re-running the chain, so N racing callers produce one
//! enforcement per applied transition.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use dlc_state::{DeviceState, EnforcementCategory, Lifecycle, ProvisionState};
use dlc_state::{DeviceLifecycle, ProvisionLifecycle};

use super::{apply_category, PolicyHandler};
use crate::error::{EngineError, StoreError};
use crate::store::{keys, read_code, ParameterStore};

/// Result of one pass over the handler chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementOutcome {
    /// Category that was applied.
    pub category: EnforcementCategory,
    /// Names of handlers that failed, in chain order.
    pub failed: Vec<&'static str>,
}

impl EnforcementOutcome {
    /// `true` when every handler succeeded.
    pub fn succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
struct EnforcementMark {
    generation: u64,
    outcome: Option<EnforcementOutcome>,
}

/// Ordered handler chain plus the generation bookkeeping.
pub struct PolicyEngine {
    handlers: Vec<Arc<dyn PolicyHandler>>,
    store: Arc<dyn ParameterStore>,
    generation: AtomicU64,
    mark: Mutex<EnforcementMark>,
}

impl PolicyEngine {
    /// Pipeline running `handlers` in order against the persisted states.
    pub fn new(handlers: Vec<Arc<dyn PolicyHandler>>, store: Arc<dyn ParameterStore>) -> Self {
        Self {
            handlers,
            store,
            generation: AtomicU64::new(0),
            mark: Mutex::new(EnforcementMark::default()),
        }
    }

    /// Record a committed transition. Must be called inside the committing
    /// machine's exclusive section, after the commit.
    pub fn advance_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Latest committed generation.
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Number of handlers in the chain.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Derive the category from the persisted states.
    pub async fn current_category(&self) -> Result<EnforcementCategory, StoreError> {
        let device: DeviceState =
            read_code(&*self.store, keys::DEVICE_STATE, DeviceLifecycle::initial()).await?;
        let provision: ProvisionState =
            read_code(&*self.store, keys::PROVISION_STATE, ProvisionLifecycle::initial()).await?;
        Ok(EnforcementCategory::derive(provision, device))
    }

    /// Enforce at least up to `generation`.
    ///
    /// Returns the recorded outcome without running the chain when a
    /// previous pass already covered `generation`.
    pub async fn enforce_for_generation(
        &self,
        generation: u64,
    ) -> Result<EnforcementOutcome, EngineError> {
        let mut mark = self.mark.lock().await;
        if let Some(outcome) = &mark.outcome {
            if mark.generation >= generation {
                tracing::debug!(
                    generation,
                    covered = mark.generation,
                    "enforcement already covers generation"
                );
                return Ok(outcome.clone());
            }
        }
        self.run_locked(&mut mark).await
    }

    /// Unconditionally re-apply the current category. Returns `true` when
    /// every handler succeeded.
    pub async fn enforce_current_policies(&self) -> Result<bool, EngineError> {
        Ok(self.enforce_current().await?.succeeded())
    }

    /// Like [`enforce_current_policies`](Self::enforce_current_policies) but
    /// returns the full outcome.
    pub async fn enforce_current(&self) -> Result<EnforcementOutcome, EngineError> {
        let mut mark = self.mark.lock().await;
        self.run_locked(&mut mark).await
    }

    async fn run_locked(&self, mark: &mut EnforcementMark) -> Result<EnforcementOutcome, EngineError> {
        // Read the generation before the states: anything committed after
        // this load is picked up by a later pass.
        let covered = self.current_generation();
        let category = self.current_category().await?;

        let mut failed = Vec::new();
        for handler in &self.handlers {
            if let Err(e) = apply_category(handler.as_ref(), category).await {
                tracing::warn!(
                    handler = handler.name(),
                    category = %category,
                    error = %e,
                    "policy handler failed"
                );
                failed.push(handler.name());
            }
        }

        let outcome = EnforcementOutcome { category, failed };
        if outcome.succeeded() {
            tracing::info!(category = %category, generation = covered, "policies enforced");
        } else {
            tracing::error!(
                category = %category,
                generation = covered,
                failed = ?outcome.failed,
                "policy enforcement failed"
            );
        }

        mark.generation = covered;
        mark.outcome = Some(outcome.clone());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::CountingHandler;
    use crate::store::MemoryParameterStore;
    use dlc_state::PersistedCode;

    async fn engine_with(
        handlers: Vec<Arc<dyn PolicyHandler>>,
    ) -> (PolicyEngine, Arc<MemoryParameterStore>) {
        let store = Arc::new(MemoryParameterStore::new());
        (PolicyEngine::new(handlers, store.clone()), store)
    }

    #[tokio::test]
    async fn default_category_is_unlocked() {
        let (engine, _) = engine_with(vec![]).await;
        assert_eq!(engine.current_category().await.unwrap(), EnforcementCategory::Unlocked);
    }

    #[tokio::test]
    async fn covered_generation_is_not_reenforced() {
        let counter = Arc::new(CountingHandler::new("counter"));
        let (engine, _) = engine_with(vec![counter.clone()]).await;

        let g = engine.advance_generation();
        engine.enforce_for_generation(g).await.unwrap();
        engine.enforce_for_generation(g).await.unwrap();
        assert_eq!(counter.invocations(), 1);

        let g2 = engine.advance_generation();
        engine.enforce_for_generation(g2).await.unwrap();
        assert_eq!(counter.invocations(), 2);
    }

    #[tokio::test]
    async fn enforce_current_always_runs() {
        let counter = Arc::new(CountingHandler::new("counter"));
        let (engine, _) = engine_with(vec![counter.clone()]).await;
        assert!(engine.enforce_current_policies().await.unwrap());
        assert!(engine.enforce_current_policies().await.unwrap());
        assert_eq!(counter.invocations(), 2);
    }

    #[tokio::test]
    async fn failure_does_not_stop_the_chain() {
        let first = Arc::new(CountingHandler::new("first"));
        let failing = Arc::new(CountingHandler::failing_on("failing", EnforcementCategory::Locked));
        let last = Arc::new(CountingHandler::new("last"));
        let (engine, store) =
            engine_with(vec![first.clone(), failing.clone(), last.clone()]).await;
        store
            .set_int(keys::PROVISION_STATE, ProvisionState::ProvisionSucceeded.to_code())
            .await
            .unwrap();
        store
            .set_int(keys::DEVICE_STATE, DeviceState::Locked.to_code())
            .await
            .unwrap();

        let outcome = engine.enforce_current().await.unwrap();
        assert_eq!(outcome.category, EnforcementCategory::Locked);
        assert_eq!(outcome.failed, vec!["failing"]);
        assert_eq!(first.invocations(), 1);
        assert_eq!(last.invocations(), 1);
    }

    #[tokio::test]
    async fn unreadable_state_is_an_error() {
        let (engine, store) = engine_with(vec![]).await;
        store.set_fail_reads(true);
        assert!(matches!(
            engine.enforce_current_policies().await,
            Err(EngineError::Storage(_))
        ));
    }
}
