use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Capital ratios sum to {requested}, exceeding the available 1.0")]
    CapitalExhausted { requested: Decimal },

    #[error("No running session with id '{0}'")]
    UnknownSession(String),

    #[error("Domain resolution failed: {0}")]
    Domain(#[from] domain::DomainError),

    #[error("Calendar failure: {0}")]
    Calendar(#[from] calendar::CalendarError),

    #[error("Clock failure: {0}")]
    Clock(#[from] clock::ClockError),

    #[error("Broker failure: {0}")]
    Broker(#[from] broker::BrokerError),

    #[error("Worker dispatch failed: {0}")]
    Process(#[from] process_manager::ProcessError),

    #[error("Worker call failed: {0}")]
    Rpc(#[from] process_manager::RpcError),

    #[error("Events log failure: {0}")]
    EventsLog(#[from] events_log::EventsLogError),

    #[error("Failed to encode a journal payload: {0}")]
    Encoding(#[from] serde_json::Error),
}
