use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_types::{BrokerState, ClockEvent, RunMode};
use events_log::LoggedEvent;

use crate::error::RpcError;

/// Everything a worker needs to start running a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitParams {
    pub session_id: String,
    pub run_mode: RunMode,
    pub capital: Decimal,
    pub max_leverage: Decimal,
    pub exchanges: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Mid-run capital or leverage change, applied at the next tick boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterUpdate {
    pub timestamp: DateTime<Utc>,
    pub capital: Decimal,
    pub max_leverage: Decimal,
}

/// The worker RPC seam. Each method maps to one remote call; transports
/// (in-process, gRPC, ...) live behind this trait.
#[async_trait]
pub trait Controllable: Send + Sync {
    async fn initialize(&self, params: &InitParams) -> Result<(), RpcError>;
    async fn parameter_update(&self, update: &ParameterUpdate) -> Result<(), RpcError>;
    async fn clock_update(&self, event: &ClockEvent) -> Result<(), RpcError>;
    async fn account_update(&self, state: &BrokerState) -> Result<(), RpcError>;
    async fn stop(&self, liquidate: bool) -> Result<(), RpcError>;

    /// Hands a freshly created worker the journal entries it missed so it
    /// can rebuild the state of the session it is taking over.
    async fn recover(&self, session_id: &str, events: &[LoggedEvent]) -> Result<(), RpcError>;

    async fn watch(&self, session_id: &str) -> Result<(), RpcError>;
    async fn stop_watching(&self, session_id: &str) -> Result<(), RpcError>;
}

/// One session's connection to its worker. The checkpoint is the last
/// journaled session start, which recovery replays from.
#[derive(Clone)]
pub struct Process {
    session_id: String,
    checkpoint: DateTime<Utc>,
    controllable: Arc<dyn Controllable>,
}

impl Process {
    pub fn new(
        session_id: impl Into<String>,
        checkpoint: DateTime<Utc>,
        controllable: Arc<dyn Controllable>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            checkpoint,
            controllable,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn checkpoint(&self) -> DateTime<Utc> {
        self.checkpoint
    }

    pub(crate) fn set_checkpoint(&mut self, checkpoint: DateTime<Utc>) {
        self.checkpoint = checkpoint;
    }

    pub async fn initialize(&self, params: &InitParams) -> Result<(), RpcError> {
        self.controllable.initialize(params).await
    }

    pub async fn parameter_update(&self, update: &ParameterUpdate) -> Result<(), RpcError> {
        self.controllable.parameter_update(update).await
    }

    pub async fn clock_update(&self, event: &ClockEvent) -> Result<(), RpcError> {
        self.controllable.clock_update(event).await
    }

    pub async fn account_update(&self, state: &BrokerState) -> Result<(), RpcError> {
        self.controllable.account_update(state).await
    }

    pub async fn stop(&self, liquidate: bool) -> Result<(), RpcError> {
        self.controllable.stop(liquidate).await
    }

    pub async fn watch(&self) -> Result<(), RpcError> {
        self.controllable.watch(&self.session_id).await
    }

    pub async fn stop_watching(&self) -> Result<(), RpcError> {
        self.controllable.stop_watching(&self.session_id).await
    }
}

/// Creates worker connections. Recovery relies on `create` returning a
/// fresh connection every time, never a cached one.
#[async_trait]
pub trait ProcessFactory: Send + Sync {
    async fn create(&self, session_id: &str) -> Result<Arc<dyn Controllable>, RpcError>;
}
