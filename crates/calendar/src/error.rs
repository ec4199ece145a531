use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("Unknown exchange: {0}")]
    UnknownExchange(String),

    #[error("Invalid calendar range: start {start} is after end {end}")]
    InvalidRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("Invalid session hours for {exchange}: open {open} is not before close {close}")]
    InvalidHours {
        exchange: String,
        open: chrono::NaiveTime,
        close: chrono::NaiveTime,
    },
}
