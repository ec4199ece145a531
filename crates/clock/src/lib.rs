//! # Clock Crate
//!
//! The event-synchronization engine of the control plane.
//!
//! A `Clock` is a per-exchange state machine that turns calendar boundaries
//! into a sequence of discrete scheduling events. It is driven by an external
//! "current time" that may run ahead of or behind its internal generator: the
//! clock stays silent while it is ahead, and fast-forwards through stale
//! intra-session events when it is behind. When its current calendar window
//! is exhausted it requests the next one from the `CalendarSource` instead of
//! failing (rollover).
//!
//! The `SignalTracker` is the per-worker aggregator: a worker trading a
//! multi-exchange domain must see exactly one coherent event stream even
//! though N independent clocks are ticking. The tracker filters signals down
//! to the exchanges the worker's domain actually contains and merges them.

pub mod clock;
pub mod error;
pub mod generator;
pub mod tracker;

pub use clock::{Clock, ClockSettings};
pub use error::ClockError;
pub use tracker::{SignalTracker, TrackerState};
