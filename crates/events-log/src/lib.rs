//! # Events Log Crate
//!
//! The durable, append-only journal that makes worker recovery
//! deterministic. Every tick's decisions (stops, parameter updates, clock
//! events, broker snapshots) are journaled in dispatch order, keyed by
//! session-start checkpoints; a recovering worker replays everything that
//! happened strictly after its last persisted checkpoint.
//!
//! Layout: a sqlite index (checkpoint → journal file path, plus one row per
//! journaled datetime) next to one JSON-lines journal file per checkpoint,
//! all under a configured root directory. Entries are written once and
//! never mutated.

pub mod error;
pub mod log;

pub use error::EventsLogError;
pub use log::{LogEventType, LoggedEvent, NoOpEventsLog, SqliteEventsLog};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// The journal seam. One implementation persists (live/paper); the no-op
/// variant serves pure simulation, where recovery never happens.
#[async_trait]
pub trait EventsLog: Send + Sync {
    /// Opens the journal for a new session-start checkpoint. Everything
    /// written afterwards belongs to this checkpoint, until the next call.
    async fn initialize(&self, checkpoint: DateTime<Utc>) -> Result<(), EventsLogError>;

    /// Records that a tick happened at `dt` under the current checkpoint.
    async fn write_datetime(&self, dt: DateTime<Utc>) -> Result<(), EventsLogError>;

    /// Appends one event row to the current checkpoint's journal file.
    async fn write_event(&self, event: &LoggedEvent) -> Result<(), EventsLogError>;

    /// Replays entries for `session_id` strictly after `since`, in
    /// checkpoint-then-in-file order. Rows that carry no session id (clock
    /// and broker fan-outs) are visible to every session.
    async fn read(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LoggedEvent>, EventsLogError>;
}
