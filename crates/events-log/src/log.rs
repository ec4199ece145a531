use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::EventsLogError;
use crate::EventsLog;

/// What kind of fact a journal row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogEventType {
    Clock,
    Parameter,
    Broker,
    Stop,
}

/// One persisted fact. `session_id` is set for rows that concern a single
/// session (parameter updates, stops); clock and broker rows apply to all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub event_type: LogEventType,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    pub payload: serde_json::Value,
}

struct OpenCheckpoint {
    checkpoint: DateTime<Utc>,
    path: PathBuf,
}

/// Journal backed by a sqlite index and one JSON-lines file per checkpoint.
pub struct SqliteEventsLog {
    pool: SqlitePool,
    root: PathBuf,
    current: Mutex<Option<OpenCheckpoint>>,
}

impl SqliteEventsLog {
    /// Opens (creating if needed) the journal under `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, EventsLogError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;

        let options = SqliteConnectOptions::new()
            .filename(root.join("index.sqlite"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                checkpoint TEXT PRIMARY KEY NOT NULL,
                file_path  TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS datetimes (
                datetime   TEXT NOT NULL,
                checkpoint TEXT NOT NULL REFERENCES checkpoints(checkpoint)
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            root,
            current: Mutex::new(None),
        })
    }

    fn journal_path(&self, checkpoint: DateTime<Utc>) -> PathBuf {
        self.root
            .join(format!("{}.jsonl", checkpoint.format("%Y%m%dT%H%M%S")))
    }

    async fn append_line(path: &Path, line: &str) -> Result<(), EventsLogError> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}

#[async_trait]
impl EventsLog for SqliteEventsLog {
    async fn initialize(&self, checkpoint: DateTime<Utc>) -> Result<(), EventsLogError> {
        let path = self.journal_path(checkpoint);
        sqlx::query("INSERT OR REPLACE INTO checkpoints (checkpoint, file_path) VALUES (?, ?)")
            .bind(checkpoint)
            .bind(path.to_string_lossy().into_owned())
            .execute(&self.pool)
            .await?;
        let mut current = self.current.lock().await;
        *current = Some(OpenCheckpoint { checkpoint, path });
        tracing::debug!(checkpoint = %checkpoint, "opened journal checkpoint");
        Ok(())
    }

    async fn write_datetime(&self, dt: DateTime<Utc>) -> Result<(), EventsLogError> {
        let current = self.current.lock().await;
        let open = current.as_ref().ok_or(EventsLogError::NotInitialized)?;
        sqlx::query("INSERT INTO datetimes (datetime, checkpoint) VALUES (?, ?)")
            .bind(dt)
            .bind(open.checkpoint)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn write_event(&self, event: &LoggedEvent) -> Result<(), EventsLogError> {
        let current = self.current.lock().await;
        let open = current.as_ref().ok_or(EventsLogError::NotInitialized)?;
        let line = serde_json::to_string(event)?;
        Self::append_line(&open.path, &line).await
    }

    async fn read(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LoggedEvent>, EventsLogError> {
        let rows = sqlx::query(
            "SELECT checkpoint, file_path FROM checkpoints
             WHERE checkpoint > ? ORDER BY checkpoint",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut replayed = Vec::new();
        for row in rows {
            let file_path: String = row.try_get("file_path")?;
            let contents = match tokio::fs::read_to_string(&file_path).await {
                Ok(contents) => contents,
                // A checkpoint with no journaled events never created its file.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for line in contents.lines() {
                if line.is_empty() {
                    continue;
                }
                let event: LoggedEvent = serde_json::from_str(line)?;
                if event.timestamp <= since {
                    continue;
                }
                match &event.session_id {
                    Some(owner) if owner != session_id => continue,
                    _ => replayed.push(event),
                }
            }
        }
        tracing::debug!(
            session_id,
            since = %since,
            entries = replayed.len(),
            "replayed events log"
        );
        Ok(replayed)
    }
}

/// The null object: pure simulation runs journal nothing and recover
/// nothing.
pub struct NoOpEventsLog;

#[async_trait]
impl EventsLog for NoOpEventsLog {
    async fn initialize(&self, _checkpoint: DateTime<Utc>) -> Result<(), EventsLogError> {
        Ok(())
    }

    async fn write_datetime(&self, _dt: DateTime<Utc>) -> Result<(), EventsLogError> {
        Ok(())
    }

    async fn write_event(&self, _event: &LoggedEvent) -> Result<(), EventsLogError> {
        Ok(())
    }

    async fn read(
        &self,
        _session_id: &str,
        _since: DateTime<Utc>,
    ) -> Result<Vec<LoggedEvent>, EventsLogError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, day, h, m, 0).unwrap()
    }

    fn clock_row(t: DateTime<Utc>) -> LoggedEvent {
        LoggedEvent {
            event_type: LogEventType::Clock,
            timestamp: t,
            session_id: None,
            payload: serde_json::json!({"event": "Bar"}),
        }
    }

    fn param_row(t: DateTime<Utc>, session: &str) -> LoggedEvent {
        LoggedEvent {
            event_type: LogEventType::Parameter,
            timestamp: t,
            session_id: Some(session.to_string()),
            payload: serde_json::json!({"capital": "50000"}),
        }
    }

    async fn seeded_log(dir: &Path) -> SqliteEventsLog {
        let log = SqliteEventsLog::open(dir).await.unwrap();
        let checkpoint = ts(5, 0, 0);
        log.initialize(checkpoint).await.unwrap();
        log.write_datetime(ts(5, 14, 30)).await.unwrap();
        log.write_event(&clock_row(ts(5, 14, 31))).await.unwrap();
        log.write_event(&param_row(ts(5, 14, 32), "s1")).await.unwrap();
        log.write_event(&param_row(ts(5, 14, 33), "s2")).await.unwrap();

        log.initialize(ts(6, 0, 0)).await.unwrap();
        log.write_event(&clock_row(ts(6, 14, 31))).await.unwrap();
        log
    }

    #[tokio::test]
    async fn replay_at_checkpoint_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = seeded_log(dir.path()).await;
        // The last checkpoint is 06 00:00; its only entry is after it, but a
        // reader caught up to the latest entry must see nothing.
        let entries = log.read("s1", ts(6, 14, 31)).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn replay_is_strictly_after_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let log = seeded_log(dir.path()).await;
        let entries = log.read("s1", ts(5, 14, 31)).await.unwrap();
        // Strictly after 14:31: the s1 parameter row and the next day's
        // clock row; the s2 row is someone else's.
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].timestamp, ts(5, 14, 32));
        assert_eq!(entries[1].timestamp, ts(6, 14, 31));
        assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn entries_replay_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = seeded_log(dir.path()).await;
        let entries = log.read("s1", ts(5, 0, 0)).await.unwrap();
        let timestamps: Vec<_> = entries.iter().map(|e| e.timestamp).collect();
        let mut deduped = timestamps.clone();
        deduped.dedup();
        assert_eq!(timestamps, deduped);
        assert_eq!(entries.len(), 3);
    }

    #[tokio::test]
    async fn writes_require_an_open_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let log = SqliteEventsLog::open(dir.path()).await.unwrap();
        let err = log.write_event(&clock_row(ts(5, 14, 31))).await.unwrap_err();
        assert!(matches!(err, EventsLogError::NotInitialized));
    }

    #[tokio::test]
    async fn noop_log_reads_empty() {
        let log = NoOpEventsLog;
        log.initialize(ts(5, 0, 0)).await.unwrap();
        log.write_event(&clock_row(ts(5, 14, 31))).await.unwrap();
        assert!(log.read("s1", ts(5, 0, 0)).await.unwrap().is_empty());
    }
}
