use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Unknown session id: {0}")]
    UnknownSession(String),

    #[error("Unknown order id: {0}")]
    UnknownOrder(uuid::Uuid),

    #[error("Order rejected for session {session_id}: {reason}")]
    OrderRejected { session_id: String, reason: String },
}
