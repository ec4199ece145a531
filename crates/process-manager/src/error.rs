use thiserror::Error;

/// Transport-level failure on the worker seam. The manager decides whether
/// this is fatal (simulation) or triggers recovery (live).
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    #[error("Worker unreachable: {0}")]
    Unavailable(String),

    #[error("Worker rejected the call: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("No process registered for session '{0}'")]
    UnknownSession(String),

    #[error("A process is already registered for session '{0}'")]
    DuplicateSession(String),

    #[error("Recovery of session '{session_id}' gave up after {attempts} attempts")]
    RecoveryExhausted { session_id: String, attempts: u32 },

    #[error(transparent)]
    EventsLog(#[from] events_log::EventsLogError),
}
