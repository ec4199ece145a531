use chrono::{DateTime, Duration, NaiveTime, Utc};

use calendar::SessionSchedule;
use core_types::ClockEventKind;

/// Shape of the event sequence produced for one session.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorSettings {
    /// When true, every trading minute yields a `Bar`/`MinuteEnd` pair.
    /// Otherwise a single `Bar` is emitted at the session close.
    pub minute_emission: bool,
    /// How long before the session open `BeforeTradingStart` fires.
    pub before_trading_start_offset: Duration,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            minute_emission: false,
            before_trading_start_offset: Duration::minutes(15),
        }
    }
}

/// Expands one session's boundaries into the ordered event sequence:
/// `SessionStart`, optional `BeforeTradingStart`, the bar run, `SessionEnd`.
///
/// `BeforeTradingStart` lands at `open - offset`. If that falls after the
/// session's last bar it is skipped silently; ordering must hold regardless.
pub fn session_events(
    schedule: &SessionSchedule,
    settings: &GeneratorSettings,
) -> Vec<(DateTime<Utc>, ClockEventKind)> {
    let mut events = Vec::new();

    let session_label = schedule
        .session
        .and_time(NaiveTime::MIN)
        .and_utc();
    events.push((session_label, ClockEventKind::SessionStart));

    let bars = bar_minutes(schedule, settings.minute_emission);
    let bts = schedule.open - settings.before_trading_start_offset;
    let last_bar = bars.last().copied().unwrap_or(schedule.close);

    let mut bts_pending = bts <= last_bar;

    for minute in bars {
        if bts_pending && bts <= minute {
            events.push((bts, ClockEventKind::BeforeTradingStart));
            bts_pending = false;
        }
        events.push((minute, ClockEventKind::Bar));
        if settings.minute_emission && minute < schedule.close {
            events.push((minute, ClockEventKind::MinuteEnd));
        }
    }

    events.push((schedule.close, ClockEventKind::SessionEnd));
    events
}

/// The bar timestamps for a session: each minute label between open and
/// close when minute emission is on, the close alone otherwise.
fn bar_minutes(schedule: &SessionSchedule, minute_emission: bool) -> Vec<DateTime<Utc>> {
    if !minute_emission {
        return vec![schedule.close];
    }
    let mut minutes = Vec::new();
    let mut cursor = schedule.open + Duration::minutes(1);
    while cursor <= schedule.close {
        minutes.push(cursor);
        cursor += Duration::minutes(1);
    }
    minutes
}
