use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use core_types::{BrokerState, ClockEvent};
use events_log::LoggedEvent;
use tokio::sync::Mutex;

use crate::error::RpcError;
use crate::process::{Controllable, InitParams, ParameterUpdate, ProcessFactory};

/// Every call a local worker has received, in arrival order.
#[derive(Debug, Clone)]
pub enum ReceivedCall {
    Initialize(InitParams),
    ParameterUpdate(ParameterUpdate),
    ClockUpdate(ClockEvent),
    AccountUpdate(BrokerState),
    Stop { liquidate: bool },
    Recover { session_id: String, replayed: usize },
    Watch(String),
    StopWatching(String),
}

/// In-process worker. Simulation runs use it as the real thing; tests use
/// `fail_next` to stage transport failures and `calls` to assert on what
/// the manager dispatched.
#[derive(Default)]
pub struct LocalControllable {
    calls: Mutex<Vec<ReceivedCall>>,
    fail_next: AtomicUsize,
}

impl LocalControllable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` calls fail with `RpcError::Unavailable`.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<ReceivedCall> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: ReceivedCall) -> Result<(), RpcError> {
        let remaining = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if remaining {
            return Err(RpcError::Unavailable("staged transport failure".into()));
        }
        self.calls.lock().await.push(call);
        Ok(())
    }
}

#[async_trait]
impl Controllable for LocalControllable {
    async fn initialize(&self, params: &InitParams) -> Result<(), RpcError> {
        self.record(ReceivedCall::Initialize(params.clone())).await
    }

    async fn parameter_update(&self, update: &ParameterUpdate) -> Result<(), RpcError> {
        self.record(ReceivedCall::ParameterUpdate(update.clone()))
            .await
    }

    async fn clock_update(&self, event: &ClockEvent) -> Result<(), RpcError> {
        self.record(ReceivedCall::ClockUpdate(event.clone())).await
    }

    async fn account_update(&self, state: &BrokerState) -> Result<(), RpcError> {
        self.record(ReceivedCall::AccountUpdate(state.clone())).await
    }

    async fn stop(&self, liquidate: bool) -> Result<(), RpcError> {
        self.record(ReceivedCall::Stop { liquidate }).await
    }

    async fn recover(&self, session_id: &str, events: &[LoggedEvent]) -> Result<(), RpcError> {
        self.record(ReceivedCall::Recover {
            session_id: session_id.to_string(),
            replayed: events.len(),
        })
        .await
    }

    async fn watch(&self, session_id: &str) -> Result<(), RpcError> {
        self.record(ReceivedCall::Watch(session_id.to_string()))
            .await
    }

    async fn stop_watching(&self, session_id: &str) -> Result<(), RpcError> {
        self.record(ReceivedCall::StopWatching(session_id.to_string()))
            .await
    }
}

/// Hands out fresh in-process workers, keeping every one it created so
/// callers can inspect replacements made during recovery.
#[derive(Default)]
pub struct LocalProcessFactory {
    created: Mutex<Vec<Arc<LocalControllable>>>,
    fail_created: AtomicUsize,
}

impl LocalProcessFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn created(&self) -> Vec<Arc<LocalControllable>> {
        self.created.lock().await.clone()
    }

    /// Every worker created from now on starts with `n` staged failures.
    pub fn fail_created(&self, n: usize) {
        self.fail_created.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProcessFactory for LocalProcessFactory {
    async fn create(&self, _session_id: &str) -> Result<Arc<dyn Controllable>, RpcError> {
        let worker = Arc::new(LocalControllable::new());
        worker.fail_next(self.fail_created.load(Ordering::SeqCst));
        self.created.lock().await.push(Arc::clone(&worker));
        Ok(worker)
    }
}
