use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Mutex;

use core_types::{BrokerState, ClockEvent};
use events_log::EventsLog;

use crate::error::{ProcessError, RpcError};
use crate::process::{ParameterUpdate, Process, ProcessFactory};

/// How dispatch reaches the workers. Simulation is synchronous and treats
/// any RPC failure as fatal; live fans out concurrently and recovers.
#[async_trait]
pub trait ProcessManager: Send + Sync {
    async fn register(&self, process: Process) -> Result<(), ProcessError>;
    async fn deregister(&self, session_id: &str) -> Result<(), ProcessError>;

    /// Records a new session-start checkpoint; recovery replays from it.
    async fn mark_checkpoint(
        &self,
        session_id: &str,
        checkpoint: DateTime<Utc>,
    ) -> Result<(), ProcessError>;

    async fn parameter_update(
        &self,
        session_id: &str,
        update: ParameterUpdate,
    ) -> Result<(), ProcessError>;

    async fn stop(&self, session_id: &str, liquidate: bool) -> Result<(), ProcessError>;

    /// One tick's per-session clock events, dispatched concurrently.
    async fn clock_update(
        &self,
        updates: Vec<(String, ClockEvent)>,
    ) -> Result<(), ProcessError>;

    /// Broker snapshot fan-out to every session.
    async fn account_update(&self, state: BrokerState) -> Result<(), ProcessError>;

    async fn session_ids(&self) -> Vec<String>;
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// In simulation the workers are in-process and deterministic, so there is
/// nothing to recover from. Any RPC error bubbles up and aborts the run.
#[derive(Default)]
pub struct SimulationProcessManager {
    processes: Mutex<HashMap<String, Process>>,
}

impl SimulationProcessManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessManager for SimulationProcessManager {
    async fn register(&self, process: Process) -> Result<(), ProcessError> {
        let mut processes = self.processes.lock().await;
        let session_id = process.session_id().to_string();
        if processes.contains_key(&session_id) {
            return Err(ProcessError::DuplicateSession(session_id));
        }
        processes.insert(session_id, process);
        Ok(())
    }

    async fn deregister(&self, session_id: &str) -> Result<(), ProcessError> {
        self.processes
            .lock()
            .await
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| ProcessError::UnknownSession(session_id.to_string()))
    }

    async fn mark_checkpoint(
        &self,
        session_id: &str,
        checkpoint: DateTime<Utc>,
    ) -> Result<(), ProcessError> {
        let mut processes = self.processes.lock().await;
        let process = processes
            .get_mut(session_id)
            .ok_or_else(|| ProcessError::UnknownSession(session_id.to_string()))?;
        process.set_checkpoint(checkpoint);
        Ok(())
    }

    async fn parameter_update(
        &self,
        session_id: &str,
        update: ParameterUpdate,
    ) -> Result<(), ProcessError> {
        let process = self.lookup(session_id).await?;
        process.parameter_update(&update).await?;
        Ok(())
    }

    async fn stop(&self, session_id: &str, liquidate: bool) -> Result<(), ProcessError> {
        let process = self.lookup(session_id).await?;
        process.stop(liquidate).await?;
        Ok(())
    }

    async fn clock_update(
        &self,
        updates: Vec<(String, ClockEvent)>,
    ) -> Result<(), ProcessError> {
        let mut dispatches = Vec::with_capacity(updates.len());
        {
            let processes = self.processes.lock().await;
            for (session_id, event) in updates {
                let process = processes
                    .get(&session_id)
                    .ok_or(ProcessError::UnknownSession(session_id))?
                    .clone();
                dispatches.push((process, event));
            }
        }
        let results = join_all(
            dispatches
                .iter()
                .map(|(process, event)| process.clock_update(event)),
        )
        .await;
        for result in results {
            result?;
        }
        Ok(())
    }

    async fn account_update(&self, state: BrokerState) -> Result<(), ProcessError> {
        let processes: Vec<Process> =
            self.processes.lock().await.values().cloned().collect();
        let results = join_all(
            processes
                .iter()
                .map(|process| process.account_update(&state)),
        )
        .await;
        for result in results {
            result?;
        }
        Ok(())
    }

    async fn session_ids(&self) -> Vec<String> {
        self.processes.lock().await.keys().cloned().collect()
    }
}

impl SimulationProcessManager {
    async fn lookup(&self, session_id: &str) -> Result<Process, ProcessError> {
        self.processes
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| ProcessError::UnknownSession(session_id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Live
// ---------------------------------------------------------------------------

/// Retry schedule for worker recovery. The delay doubles after each failed
/// attempt, starting at `backoff_ms`.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 500,
        }
    }
}

impl RecoveryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(1u64 << attempt.min(16)))
    }
}

/// A call that could not be delivered because its session is recovering.
/// Queued in arrival order and replayed against the replacement worker.
#[derive(Debug, Clone)]
enum PendingCall {
    Parameter(ParameterUpdate),
    Clock(ClockEvent),
    Account(BrokerState),
    Stop { liquidate: bool },
}

struct RecoveringSession {
    checkpoint: DateTime<Utc>,
    pending: VecDeque<PendingCall>,
}

/// All session bookkeeping lives under one lock. A session is in exactly
/// one of `active`, `recovering` or `failed` at any time.
#[derive(Default)]
struct ManagerState {
    active: HashMap<String, Process>,
    recovering: HashMap<String, RecoveringSession>,
    failed: HashSet<String>,
}

struct LiveInner {
    state: Mutex<ManagerState>,
    factory: Arc<dyn ProcessFactory>,
    events_log: Arc<dyn EventsLog>,
    policy: RecoveryPolicy,
}

/// Live dispatch: concurrent fan-out, and a recovery routine that replaces
/// a failed worker with a fresh one, replays the journal since the
/// session's last checkpoint, then drains the calls queued meanwhile.
pub struct LiveProcessManager {
    inner: Arc<LiveInner>,
}

impl LiveProcessManager {
    pub fn new(
        factory: Arc<dyn ProcessFactory>,
        events_log: Arc<dyn EventsLog>,
        policy: RecoveryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(LiveInner {
                state: Mutex::new(ManagerState::default()),
                factory,
                events_log,
                policy,
            }),
        }
    }

    /// Sessions whose recovery was exhausted. They receive no further calls.
    pub async fn failed_sessions(&self) -> Vec<String> {
        let state = self.inner.state.lock().await;
        state.failed.iter().cloned().collect()
    }

    /// Routes one session-targeted call: dispatch if active, queue if
    /// recovering, drop with a warning if permanently failed.
    async fn dispatch_or_queue(&self, session_id: &str, call: PendingCall) -> Result<(), ProcessError> {
        let process = {
            let mut state = self.inner.state.lock().await;
            if let Some(session) = state.recovering.get_mut(session_id) {
                session.pending.push_back(call);
                return Ok(());
            }
            if state.failed.contains(session_id) {
                tracing::warn!(session_id, "dropping call for permanently failed session");
                return Ok(());
            }
            state
                .active
                .get(session_id)
                .cloned()
                .ok_or_else(|| ProcessError::UnknownSession(session_id.to_string()))?
        };
        if let Err(error) = dispatch(&process, &call).await {
            self.begin_recovery(process, call, error).await;
        }
        Ok(())
    }

    /// Moves the session out of the active map, queues the failed call at
    /// the front, and spawns the recovery task.
    async fn begin_recovery(&self, process: Process, call: PendingCall, error: RpcError) {
        let session_id = process.session_id().to_string();
        tracing::warn!(session_id = %session_id, %error, "worker call failed, starting recovery");
        {
            let mut state = self.inner.state.lock().await;
            state.active.remove(&session_id);
            let mut pending = VecDeque::new();
            pending.push_back(call);
            state.recovering.insert(
                session_id.clone(),
                RecoveringSession {
                    checkpoint: process.checkpoint(),
                    pending,
                },
            );
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_recovery(inner, session_id).await;
        });
    }
}

async fn dispatch(process: &Process, call: &PendingCall) -> Result<(), RpcError> {
    match call {
        PendingCall::Parameter(update) => process.parameter_update(update).await,
        PendingCall::Clock(event) => process.clock_update(event).await,
        PendingCall::Account(state) => process.account_update(state).await,
        PendingCall::Stop { liquidate } => process.stop(*liquidate).await,
    }
}

async fn run_recovery(inner: Arc<LiveInner>, session_id: String) {
    let checkpoint = {
        let state = inner.state.lock().await;
        match state.recovering.get(&session_id) {
            Some(session) => session.checkpoint,
            None => return,
        }
    };

    for attempt in 0..inner.policy.max_attempts {
        if attempt > 0 {
            tokio::time::sleep(inner.policy.delay(attempt - 1)).await;
        }
        match attempt_recovery(&inner, &session_id, checkpoint).await {
            Ok(()) => {
                tracing::info!(session_id = %session_id, attempt, "session recovered");
                return;
            }
            Err(error) => {
                tracing::warn!(
                    session_id = %session_id,
                    attempt,
                    %error,
                    "recovery attempt failed"
                );
            }
        }
    }

    let mut state = inner.state.lock().await;
    let dropped = state
        .recovering
        .remove(&session_id)
        .map(|s| s.pending.len())
        .unwrap_or(0);
    state.failed.insert(session_id.clone());
    tracing::error!(
        session_id = %session_id,
        attempts = inner.policy.max_attempts,
        dropped,
        "recovery exhausted, session marked failed"
    );
}

/// One recovery attempt: fresh worker, journal replay, then drain the
/// pending queue in arrival order. Only an empty queue lets the session
/// back into the active map; calls that arrive mid-drain are replayed too.
async fn attempt_recovery(
    inner: &Arc<LiveInner>,
    session_id: &str,
    checkpoint: DateTime<Utc>,
) -> Result<(), ProcessError> {
    let controllable = inner.factory.create(session_id).await?;
    let events = inner.events_log.read(session_id, checkpoint).await?;
    controllable.recover(session_id, &events).await?;
    let process = Process::new(session_id, checkpoint, controllable);
    process.watch().await?;

    loop {
        let next = {
            let mut state = inner.state.lock().await;
            match state.recovering.get_mut(session_id) {
                Some(session) => match session.pending.pop_front() {
                    Some(call) => Some(call),
                    None => {
                        state.recovering.remove(session_id);
                        state
                            .active
                            .insert(session_id.to_string(), process.clone());
                        None
                    }
                },
                // Deregistered while recovering.
                None => return Ok(()),
            }
        };
        let Some(call) = next else {
            return Ok(());
        };
        if let Err(error) = dispatch(&process, &call).await {
            // The replacement failed too. Re-queue the call at the front and
            // let the attempt loop retry with yet another worker.
            let mut state = inner.state.lock().await;
            if let Some(session) = state.recovering.get_mut(session_id) {
                session.pending.push_front(call);
            }
            return Err(error.into());
        }
    }
}

#[async_trait]
impl ProcessManager for LiveProcessManager {
    async fn register(&self, process: Process) -> Result<(), ProcessError> {
        let session_id = process.session_id().to_string();
        {
            let state = self.inner.state.lock().await;
            if state.active.contains_key(&session_id)
                || state.recovering.contains_key(&session_id)
            {
                return Err(ProcessError::DuplicateSession(session_id));
            }
        }
        process.watch().await?;
        let mut state = self.inner.state.lock().await;
        state.failed.remove(&session_id);
        state.active.insert(session_id, process);
        Ok(())
    }

    async fn deregister(&self, session_id: &str) -> Result<(), ProcessError> {
        let process = {
            let mut state = self.inner.state.lock().await;
            if state.recovering.remove(session_id).is_some() {
                return Ok(());
            }
            state
                .active
                .remove(session_id)
                .ok_or_else(|| ProcessError::UnknownSession(session_id.to_string()))?
        };
        process.stop_watching().await?;
        Ok(())
    }

    async fn mark_checkpoint(
        &self,
        session_id: &str,
        checkpoint: DateTime<Utc>,
    ) -> Result<(), ProcessError> {
        let mut state = self.inner.state.lock().await;
        if let Some(process) = state.active.get_mut(session_id) {
            process.set_checkpoint(checkpoint);
            return Ok(());
        }
        if let Some(session) = state.recovering.get_mut(session_id) {
            session.checkpoint = checkpoint;
            return Ok(());
        }
        Err(ProcessError::UnknownSession(session_id.to_string()))
    }

    async fn parameter_update(
        &self,
        session_id: &str,
        update: ParameterUpdate,
    ) -> Result<(), ProcessError> {
        self.dispatch_or_queue(session_id, PendingCall::Parameter(update))
            .await
    }

    async fn stop(&self, session_id: &str, liquidate: bool) -> Result<(), ProcessError> {
        self.dispatch_or_queue(session_id, PendingCall::Stop { liquidate })
            .await
    }

    async fn clock_update(
        &self,
        updates: Vec<(String, ClockEvent)>,
    ) -> Result<(), ProcessError> {
        let mut dispatches = Vec::new();
        {
            let mut state = self.inner.state.lock().await;
            for (session_id, event) in updates {
                if let Some(session) = state.recovering.get_mut(&session_id) {
                    session.pending.push_back(PendingCall::Clock(event));
                } else if state.failed.contains(&session_id) {
                    tracing::warn!(
                        session_id = %session_id,
                        "dropping clock event for permanently failed session"
                    );
                } else if let Some(process) = state.active.get(&session_id) {
                    dispatches.push((process.clone(), PendingCall::Clock(event)));
                } else {
                    return Err(ProcessError::UnknownSession(session_id));
                }
            }
        }
        let results = join_all(
            dispatches
                .iter()
                .map(|(process, call)| dispatch(process, call)),
        )
        .await;
        for ((process, call), result) in dispatches.into_iter().zip(results) {
            if let Err(error) = result {
                self.begin_recovery(process, call, error).await;
            }
        }
        Ok(())
    }

    async fn account_update(&self, state: BrokerState) -> Result<(), ProcessError> {
        let mut dispatches = Vec::new();
        {
            let mut manager_state = self.inner.state.lock().await;
            for session in manager_state.recovering.values_mut() {
                session.pending.push_back(PendingCall::Account(state.clone()));
            }
            for process in manager_state.active.values() {
                dispatches.push((process.clone(), PendingCall::Account(state.clone())));
            }
        }
        let results = join_all(
            dispatches
                .iter()
                .map(|(process, call)| dispatch(process, call)),
        )
        .await;
        for ((process, call), result) in dispatches.into_iter().zip(results) {
            if let Err(error) = result {
                self.begin_recovery(process, call, error).await;
            }
        }
        Ok(())
    }

    async fn session_ids(&self) -> Vec<String> {
        let state = self.inner.state.lock().await;
        state
            .active
            .keys()
            .chain(state.recovering.keys())
            .cloned()
            .collect()
    }
}
