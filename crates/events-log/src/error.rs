use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventsLogError {
    #[error("Failed to access the journal index database: {0}")]
    Index(#[from] sqlx::Error),

    #[error("Journal file I/O failed: {0}")]
    Journal(#[from] std::io::Error),

    #[error("Failed to encode or decode a journal row: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("The events log has no open checkpoint; call initialize first")]
    NotInitialized,
}
