use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClockError {
    #[error("Calendar failure: {0}")]
    Calendar(#[from] calendar::CalendarError),

    #[error("Calendar for {exchange} has no sessions between {start} and {end}")]
    EmptyCalendar {
        exchange: String,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },
}
