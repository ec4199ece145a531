//! # Calendar Crate
//!
//! The contract between the control plane and exchange calendars: given an
//! exchange and a date range, a `CalendarSource` yields the ordered session
//! boundaries (open/close) for that exchange. Calendar *data* lives outside
//! the system; this crate only defines the boundary and ships a static
//! weekday implementation for simulations and tests.
//!
//! An empty window is a legal answer, not an error. Clocks use it to decide
//! that a calendar is exhausted and must roll over (or stop); only genuine
//! failures surface as `CalendarError`.

pub mod error;
pub mod source;

pub use error::CalendarError;
pub use source::{
    CalendarSource, CalendarWindow, ExchangeHours, SessionSchedule, StaticCalendarSource,
};
