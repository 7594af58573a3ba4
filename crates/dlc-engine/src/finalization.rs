//! # Finalization Dispatch Queue
//!
//! The end of the program is irreversible, so its steps run one at a time
//! on a single worker task. Callers submit a target checkpoint and await
//! the worker's reply; concurrent triggers queue behind each other and find
//! the work already done.
//!
//! ## Steps
//!
//! | entering              | side effect                                  |
//! |-----------------------|----------------------------------------------|
//! | `RestrictionsCleared` | none                                         |
//! | `Reporting`           | enqueue `report-device-finalized` (Keep)     |
//! | `Reported`            | disable the controller's boot receiver       |
//!
//! Each step persists the new checkpoint before its side effect. A failed
//! side effect restores the previous checkpoint; the next trigger retries.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use dlc_core::{Clock, REPORT_DEVICE_FINALIZED_WORK};
use dlc_state::{FinalizationState, PersistedCode};

use crate::error::EngineError;
use crate::policy::DevicePolicyPort;
use crate::store::{code_or, keys, read_code, ParameterStore};
use crate::work::{ExistingWorkPolicy, UniqueWorkDispatcher, WorkKind, WorkRequest};

const QUEUE_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy)]
enum Request {
    Advance(FinalizationState),
    Resume,
}

struct Job {
    request: Request,
    reply: oneshot::Sender<Result<FinalizationState, EngineError>>,
}

/// Handle to the finalization worker.
#[derive(Clone)]
pub struct FinalizationController {
    tx: mpsc::Sender<Job>,
    store: Arc<dyn ParameterStore>,
}

impl FinalizationController {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// The worker exits once every handle has been dropped.
    pub fn spawn(
        store: Arc<dyn ParameterStore>,
        dispatcher: Arc<dyn UniqueWorkDispatcher>,
        port: Arc<dyn DevicePolicyPort>,
        clock: Arc<dyn Clock>,
        boot_receiver_component: String,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let worker = FinalizationWorker {
            store: Arc::clone(&store),
            dispatcher,
            port,
            clock,
            boot_receiver_component,
        };
        tokio::spawn(worker.run(rx));
        Self { tx, store }
    }

    /// Device policies were cleared. Advances through `Reporting`.
    pub async fn notify_restrictions_cleared(&self) -> Result<FinalizationState, EngineError> {
        self.submit(Request::Advance(FinalizationState::Reporting))
            .await
    }

    /// The server acknowledged the finalization report. Advances to
    /// `Reported`.
    pub async fn notify_restrictions_cleared_and_finalized(
        &self,
    ) -> Result<FinalizationState, EngineError> {
        self.submit(Request::Advance(FinalizationState::Reported))
            .await
    }

    /// Re-run the side effect of the persisted checkpoint after a restart.
    pub async fn resume(&self) -> Result<FinalizationState, EngineError> {
        self.submit(Request::Resume).await
    }

    /// Persisted checkpoint. Read faults are logged and read as `NotStarted`.
    pub async fn state(&self) -> FinalizationState {
        code_or(&*self.store, keys::FINALIZATION_STATE, FinalizationState::NotStarted).await
    }

    async fn submit(&self, request: Request) -> Result<FinalizationState, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job { request, reply })
            .await
            .map_err(|_| EngineError::QueueClosed)?;
        rx.await.map_err(|_| EngineError::QueueClosed)?
    }
}

struct FinalizationWorker {
    store: Arc<dyn ParameterStore>,
    dispatcher: Arc<dyn UniqueWorkDispatcher>,
    port: Arc<dyn DevicePolicyPort>,
    clock: Arc<dyn Clock>,
    boot_receiver_component: String,
}

impl FinalizationWorker {
    async fn run(self, mut rx: mpsc::Receiver<Job>) {
        while let Some(job) = rx.recv().await {
            let result = match job.request {
                Request::Advance(target) => self.advance(target).await,
                Request::Resume => self.resume().await,
            };
            if let Err(e) = &result {
                tracing::warn!(request = ?job.request, error = %e, "finalization request failed");
            }
            // The caller may have given up waiting.
            let _ = job.reply.send(result);
        }
        tracing::debug!("finalization worker stopped");
    }

    async fn checkpoint(&self) -> Result<FinalizationState, EngineError> {
        Ok(read_code(&*self.store, keys::FINALIZATION_STATE, FinalizationState::NotStarted).await?)
    }

    async fn advance(&self, target: FinalizationState) -> Result<FinalizationState, EngineError> {
        let mut current = self.checkpoint().await?;
        for step in current.steps_to(target) {
            self.store
                .set_int(keys::FINALIZATION_STATE, step.to_code())
                .await?;
            if let Err(reason) = self.side_effect(step).await {
                self.restore(current).await;
                return Err(EngineError::FinalizationStep { step, reason });
            }
            tracing::info!(from = %current, to = %step, "finalization advanced");
            current = step;
        }
        Ok(current)
    }

    async fn resume(&self) -> Result<FinalizationState, EngineError> {
        let current = self.checkpoint().await?;
        match current {
            FinalizationState::NotStarted => Ok(current),
            FinalizationState::RestrictionsCleared => {
                self.advance(FinalizationState::Reporting).await
            }
            FinalizationState::Reporting | FinalizationState::Reported => {
                self.side_effect(current)
                    .await
                    .map_err(|reason| EngineError::FinalizationStep {
                        step: current,
                        reason,
                    })?;
                tracing::info!(state = %current, "finalization resumed");
                Ok(current)
            }
        }
    }

    async fn side_effect(&self, step: FinalizationState) -> Result<(), String> {
        match step {
            FinalizationState::NotStarted | FinalizationState::RestrictionsCleared => Ok(()),
            FinalizationState::Reporting => {
                let request = WorkRequest::new(WorkKind::ReportDeviceFinalized, self.clock.now());
                self.dispatcher
                    .enqueue_unique(
                        REPORT_DEVICE_FINALIZED_WORK.into(),
                        ExistingWorkPolicy::Keep,
                        request,
                    )
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            FinalizationState::Reported => self
                .port
                .set_component_enabled(&self.boot_receiver_component, false)
                .await
                .map_err(|e| e.to_string()),
        }
    }

    async fn restore(&self, previous: FinalizationState) {
        if let Err(e) = self
            .store
            .set_int(keys::FINALIZATION_STATE, previous.to_code())
            .await
        {
            tracing::error!(state = %previous, error = %e, "failed to restore finalization checkpoint");
        }
    }
}
