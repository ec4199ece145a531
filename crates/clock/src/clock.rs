use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use calendar::CalendarSource;
use core_types::{ClockEventKind, Signal};

use crate::error::ClockError;
use crate::generator::{GeneratorSettings, session_events};

/// How a clock builds and refreshes its event sequence.
#[derive(Debug, Clone, Copy)]
pub struct ClockSettings {
    pub minute_emission: bool,
    /// Minutes before the open at which `BeforeTradingStart` fires.
    pub before_trading_start_offset_minutes: i64,
    /// Calendar days fetched per rollover window.
    pub window_days: i64,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            minute_emission: false,
            before_trading_start_offset_minutes: 15,
            window_days: 30,
        }
    }
}

impl ClockSettings {
    fn generator(&self) -> GeneratorSettings {
        GeneratorSettings {
            minute_emission: self.minute_emission,
            before_trading_start_offset: Duration::minutes(
                self.before_trading_start_offset_minutes,
            ),
        }
    }
}

/// Pending stop request; applied at the next session boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopRequest {
    Stop,
    Liquidate,
}

/// Per-exchange scheduling state machine.
///
/// `advance(external_dt)` returns the next pending event once the external
/// time has reached it, `None` while the clock is ahead. The clock holds no
/// partial-tick state: any calendar error propagates and the caller is
/// expected to drop or replace the clock.
pub struct Clock {
    exchange: String,
    source: Arc<dyn CalendarSource>,
    settings: ClockSettings,
    end: NaiveDate,
    pending: VecDeque<(DateTime<Utc>, ClockEventKind)>,
    /// Day after the last generated session; where the next window starts.
    next_window_start: NaiveDate,
    stop_request: Option<StopRequest>,
    finished: bool,
}

impl Clock {
    pub fn new(
        exchange: impl Into<String>,
        source: Arc<dyn CalendarSource>,
        start: NaiveDate,
        end: NaiveDate,
        settings: ClockSettings,
    ) -> Result<Self, ClockError> {
        let exchange = exchange.into();
        let mut clock = Self {
            exchange,
            source,
            settings,
            end,
            pending: VecDeque::new(),
            next_window_start: start,
            stop_request: None,
            finished: false,
        };
        if !clock.fill_next_window()? {
            return Err(ClockError::EmptyCalendar {
                exchange: clock.exchange,
                start,
                end,
            });
        }
        // The very first event of a clock's life is Initialize, at the same
        // timestamp as the first SessionStart.
        if let Some(&(first_ts, _)) = clock.pending.front() {
            clock
                .pending
                .push_front((first_ts, ClockEventKind::Initialize));
        }
        Ok(clock)
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// The timestamp of the next pending event, if any. Lets a
    /// discrete-event driver pick the minimum across clocks.
    pub fn peek_timestamp(&self) -> Option<DateTime<Utc>> {
        if self.finished {
            None
        } else {
            self.pending.front().map(|&(ts, _)| ts)
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Requests that the next `SessionStart` be replaced by `Liquidate`
    /// (when `liquidate` is set) or `Stop`, ending the clock.
    pub fn request_stop(&mut self, liquidate: bool) {
        self.stop_request = Some(if liquidate {
            StopRequest::Liquidate
        } else {
            StopRequest::Stop
        });
    }

    /// Advances the clock against the external current time.
    ///
    /// Returns `None` while the clock is ahead of `external_dt`. When the
    /// external time has passed several intra-session events (a driver
    /// running faster than the per-minute generator), stale `Bar`s and
    /// `MinuteEnd`s are drained so the clock catches up; structural events
    /// are never skipped.
    pub fn advance(&mut self, external_dt: DateTime<Utc>) -> Result<Option<Signal>, ClockError> {
        if self.finished {
            return Ok(None);
        }

        self.fast_forward(external_dt);

        let Some(&(ts, kind)) = self.pending.front() else {
            // Exhausted mid-advance; roll over before deciding.
            self.refill()?;
            return self.advance(external_dt);
        };

        if ts > external_dt {
            // Clock is ahead of the driver; stay silent until in sync.
            return Ok(None);
        }

        // A pending stop replaces the next session start.
        if kind == ClockEventKind::SessionStart {
            if let Some(request) = self.stop_request.take() {
                self.pending.clear();
                self.finished = true;
                let event = match request {
                    StopRequest::Stop => ClockEventKind::Stop,
                    StopRequest::Liquidate => ClockEventKind::Liquidate,
                };
                tracing::info!(exchange = %self.exchange, ?event, "clock stopped on request");
                return Ok(Some(Signal {
                    exchange: self.exchange.clone(),
                    timestamp: ts,
                    event,
                }));
            }
        }

        self.pending.pop_front();
        if kind == ClockEventKind::Stop {
            self.finished = true;
        }
        if self.pending.is_empty() && !self.finished {
            self.refill()?;
        }

        Ok(Some(Signal {
            exchange: self.exchange.clone(),
            timestamp: ts,
            event: kind,
        }))
    }

    /// Drops intra-session events the driver has already passed. Keeps at
    /// least one event queued so the caller still observes a tick.
    fn fast_forward(&mut self, external_dt: DateTime<Utc>) {
        let mut skipped = 0usize;
        while self.pending.len() > 1 {
            let stale = {
                let front = self.pending.front();
                let next = self.pending.get(1);
                match (front, next) {
                    (Some(&(ts, kind)), Some(&(next_ts, _))) => {
                        ts < external_dt
                            && next_ts <= external_dt
                            && matches!(kind, ClockEventKind::Bar | ClockEventKind::MinuteEnd)
                    }
                    _ => false,
                }
            };
            if !stale {
                break;
            }
            self.pending.pop_front();
            skipped += 1;
        }
        if skipped > 0 {
            tracing::debug!(
                exchange = %self.exchange,
                skipped,
                "fast-forwarded stale bars"
            );
        }
    }

    /// Rollover: fetch the next calendar window, or queue the final `Stop`
    /// when the end date is reached. Exhaustion is data, never an error.
    fn refill(&mut self) -> Result<(), ClockError> {
        if self.fill_next_window()? {
            // Let consumers reload calendar-derived state for the new window.
            if let Some(&(first_ts, _)) = self.pending.front() {
                self.pending.push_front((first_ts, ClockEventKind::Calendar));
            }
            tracing::debug!(exchange = %self.exchange, "clock rolled over onto a new window");
        } else {
            let ts = self
                .next_window_start
                .and_time(NaiveTime::MIN)
                .and_utc();
            self.pending.push_back((ts, ClockEventKind::Stop));
        }
        Ok(())
    }

    /// Generates events for the next non-empty window inside the clock's
    /// range. Returns false once the range is exhausted.
    fn fill_next_window(&mut self) -> Result<bool, ClockError> {
        let generator = self.settings.generator();
        while self.next_window_start <= self.end {
            let window_end = std::cmp::min(
                self.end,
                self.next_window_start + Duration::days(self.settings.window_days),
            );
            let window = self
                .source
                .window(&self.exchange, self.next_window_start, window_end)?;
            self.next_window_start = match window_end.succ_opt() {
                Some(day) => day,
                None => return Ok(!self.pending.is_empty()),
            };
            if window.is_empty() {
                // Legal: a chunk of nothing but closed days. Keep scanning.
                continue;
            }
            for schedule in &window.sessions {
                self.pending.extend(session_events(schedule, &generator));
            }
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calendar::StaticCalendarSource;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn source() -> Arc<dyn CalendarSource> {
        Arc::new(
            StaticCalendarSource::with_uniform_hours(
                &["XNYS", "XLON"],
                NaiveTime::from_hms_opt(14, 30, 0).unwrap(),
                NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
            )
            .unwrap(),
        )
    }

    fn drain(clock: &mut Clock) -> Vec<Signal> {
        let mut out = Vec::new();
        while let Some(ts) = clock.peek_timestamp() {
            match clock.advance(ts).unwrap() {
                Some(signal) => out.push(signal),
                None => break,
            }
        }
        out
    }

    #[test]
    fn emits_initialize_once_then_session_ordering() {
        let mut clock = Clock::new(
            "XNYS",
            source(),
            date(2023, 6, 5),
            date(2023, 6, 6),
            ClockSettings::default(),
        )
        .unwrap();

        let events: Vec<_> = drain(&mut clock).into_iter().map(|s| s.event).collect();
        assert_eq!(events[0], ClockEventKind::Initialize);
        assert_eq!(
            events.iter().filter(|e| **e == ClockEventKind::Initialize).count(),
            1
        );
        // Two sessions, each: start -> bts -> bar -> end, then the final stop.
        assert_eq!(
            events[1..],
            vec![
                ClockEventKind::SessionStart,
                ClockEventKind::BeforeTradingStart,
                ClockEventKind::Bar,
                ClockEventKind::SessionEnd,
                ClockEventKind::SessionStart,
                ClockEventKind::BeforeTradingStart,
                ClockEventKind::Bar,
                ClockEventKind::SessionEnd,
                ClockEventKind::Stop,
            ]
        );
        assert!(clock.is_finished());
    }

    #[test]
    fn timestamps_are_monotonically_non_decreasing() {
        let mut clock = Clock::new(
            "XNYS",
            source(),
            date(2023, 6, 1),
            date(2023, 6, 30),
            ClockSettings {
                minute_emission: true,
                ..ClockSettings::default()
            },
        )
        .unwrap();
        let signals = drain(&mut clock);
        assert!(signals.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn stays_silent_while_ahead_of_the_driver() {
        let mut clock = Clock::new(
            "XNYS",
            source(),
            date(2023, 6, 5),
            date(2023, 6, 9),
            ClockSettings::default(),
        )
        .unwrap();
        let first = clock.peek_timestamp().unwrap();
        assert!(
            clock
                .advance(first - Duration::minutes(1))
                .unwrap()
                .is_none()
        );
        // Still pending: the driver catching up receives the event.
        assert_eq!(
            clock.advance(first).unwrap().unwrap().event,
            ClockEventKind::Initialize
        );
    }

    #[test]
    fn fast_forward_drains_stale_bars_but_keeps_structure() {
        let mut clock = Clock::new(
            "XNYS",
            source(),
            date(2023, 6, 5),
            date(2023, 6, 5),
            ClockSettings {
                minute_emission: true,
                ..ClockSettings::default()
            },
        )
        .unwrap();
        // Walk up to the first Bar.
        let mut seen = Vec::new();
        while seen.last() != Some(&ClockEventKind::Bar) {
            let ts = clock.peek_timestamp().unwrap();
            seen.push(clock.advance(ts).unwrap().unwrap().event);
        }
        // Jump the driver to the close: interior bars are skipped, but the
        // final bar and SessionEnd still arrive.
        let close = date(2023, 6, 5)
            .and_time(NaiveTime::from_hms_opt(21, 0, 0).unwrap())
            .and_utc();
        let mut tail = Vec::new();
        while let Some(signal) = clock.advance(close).unwrap() {
            tail.push(signal.event);
            if signal.event == ClockEventKind::SessionEnd {
                break;
            }
        }
        assert!(tail.contains(&ClockEventKind::SessionEnd));
        assert!(
            tail.iter().filter(|e| **e == ClockEventKind::Bar).count() <= 2,
            "stale bars should have been drained, got {tail:?}"
        );
    }

    #[test]
    fn rollover_crosses_window_boundaries_with_calendar_events() {
        let mut clock = Clock::new(
            "XNYS",
            source(),
            date(2023, 6, 1),
            date(2023, 8, 31),
            ClockSettings {
                window_days: 7,
                ..ClockSettings::default()
            },
        )
        .unwrap();
        let signals = drain(&mut clock);
        let calendars = signals
            .iter()
            .filter(|s| s.event == ClockEventKind::Calendar)
            .count();
        assert!(calendars >= 2, "expected several rollovers, got {calendars}");
        assert_eq!(signals.last().unwrap().event, ClockEventKind::Stop);
    }

    #[test]
    fn stop_request_replaces_next_session_start() {
        let mut clock = Clock::new(
            "XNYS",
            source(),
            date(2023, 6, 5),
            date(2023, 6, 9),
            ClockSettings::default(),
        )
        .unwrap();
        // Run through the first session.
        let mut last = None;
        while last != Some(ClockEventKind::SessionEnd) {
            let ts = clock.peek_timestamp().unwrap();
            last = clock.advance(ts).unwrap().map(|s| s.event);
        }
        clock.request_stop(true);
        let ts = clock.peek_timestamp().unwrap();
        let signal = clock.advance(ts).unwrap().unwrap();
        assert_eq!(signal.event, ClockEventKind::Liquidate);
        assert!(clock.is_finished());
        assert_eq!(clock.advance(ts).unwrap(), None);
    }

    #[test]
    fn empty_range_fails_fast() {
        // Saturday-Sunday only.
        let result = Clock::new(
            "XNYS",
            source(),
            date(2023, 6, 3),
            date(2023, 6, 4),
            ClockSettings::default(),
        );
        assert!(matches!(result, Err(ClockError::EmptyCalendar { .. })));
    }

    #[test]
    fn no_bar_outside_session_bounds() {
        let mut clock = Clock::new(
            "XNYS",
            source(),
            date(2023, 6, 5),
            date(2023, 6, 16),
            ClockSettings {
                minute_emission: true,
                ..ClockSettings::default()
            },
        )
        .unwrap();
        let signals = drain(&mut clock);
        let mut in_session = false;
        let mut bts_seen_this_session = 0;
        for signal in &signals {
            match signal.event {
                ClockEventKind::SessionStart => {
                    in_session = true;
                    bts_seen_this_session = 0;
                }
                ClockEventKind::SessionEnd => in_session = false,
                ClockEventKind::BeforeTradingStart => {
                    bts_seen_this_session += 1;
                    assert_eq!(bts_seen_this_session, 1);
                }
                ClockEventKind::Bar | ClockEventKind::MinuteEnd => {
                    assert!(in_session, "bar outside session at {}", signal.timestamp);
                }
                _ => {}
            }
        }
    }
}
