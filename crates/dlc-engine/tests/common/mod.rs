//! Shared engine harness for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use dlc_core::EpochMillis;
use dlc_engine::mock::{
    CountingHandler, ManualClock, RecordingPolicyPort, RecordingTimer, RecordingWorkDispatcher,
};
use dlc_engine::store::keys;
use dlc_engine::{DeviceLockEngine, MemoryParameterStore, ParameterStore, PolicyHandler};
use dlc_state::{DeviceState, PersistedCode, ProvisionState};

pub const START: i64 = 1_714_000_000_000;

pub struct Harness {
    pub engine: Arc<DeviceLockEngine>,
    pub store: Arc<dyn ParameterStore>,
    pub clock: Arc<ManualClock>,
    pub timer: Arc<RecordingTimer>,
    pub dispatcher: Arc<RecordingWorkDispatcher>,
    pub port: Arc<RecordingPolicyPort>,
}

pub struct HarnessBuilder {
    store: Arc<dyn ParameterStore>,
    clock: Arc<ManualClock>,
    dispatcher: Arc<RecordingWorkDispatcher>,
    handlers: Option<Vec<Arc<dyn PolicyHandler>>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryParameterStore::new()),
            clock: Arc::new(ManualClock::new(EpochMillis::from_millis(START))),
            dispatcher: Arc::new(RecordingWorkDispatcher::new()),
            handlers: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn ParameterStore>) -> Self {
        self.store = store;
        self
    }

    pub fn clock(mut self, clock: Arc<ManualClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<RecordingWorkDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn handlers(mut self, handlers: Vec<Arc<dyn PolicyHandler>>) -> Self {
        self.handlers = Some(handlers);
        self
    }

    pub fn counting(self) -> (Self, Arc<CountingHandler>) {
        let counter = Arc::new(CountingHandler::new("counter"));
        (self.handlers(vec![counter.clone()]), counter)
    }

    pub fn build(self) -> Harness {
        let timer = Arc::new(RecordingTimer::new());
        let port = Arc::new(RecordingPolicyPort::new());
        let mut builder = DeviceLockEngine::builder()
            .store(self.store.clone())
            .timer(timer.clone())
            .dispatcher(self.dispatcher.clone())
            .policy_port(port.clone())
            .clock(self.clock.clone());
        if let Some(handlers) = self.handlers {
            builder = builder.handlers(handlers);
        }
        Harness {
            engine: Arc::new(builder.build().expect("engine builds")),
            store: self.store,
            clock: self.clock,
            timer,
            dispatcher: self.dispatcher,
            port,
        }
    }
}

pub async fn seed_device(store: &Arc<dyn ParameterStore>, state: DeviceState) {
    store
        .set_int(keys::DEVICE_STATE, state.to_code())
        .await
        .expect("seed device state");
}

pub async fn seed_provision(store: &Arc<dyn ParameterStore>, state: ProvisionState) {
    store
        .set_int(keys::PROVISION_STATE, state.to_code())
        .await
        .expect("seed provision state");
}
