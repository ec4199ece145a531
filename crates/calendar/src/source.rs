use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::CalendarError;

/// The boundaries of one trading session on one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSchedule {
    /// The session label (the trading day).
    pub session: NaiveDate,
    pub open: DateTime<Utc>,
    pub close: DateTime<Utc>,
}

/// An ordered run of sessions for one exchange. Clocks consume one window at
/// a time and request the next when the current one is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarWindow {
    pub exchange: String,
    pub sessions: Vec<SessionSchedule>,
}

impl CalendarWindow {
    /// True when the range contained no sessions at all. This is the
    /// "exhausted, roll over" value, not a failure.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// A producer of ordered session boundaries for an exchange.
///
/// Implementations must return sessions in strictly ascending order and may
/// legally return an empty window for a range with no trading days.
pub trait CalendarSource: Send + Sync {
    fn window(
        &self,
        exchange: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<CalendarWindow, CalendarError>;
}

/// Fixed open/close hours for one exchange, used by the static source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

/// A calendar source with fixed weekday sessions per exchange.
///
/// Holiday tables are out of scope; every Monday-Friday inside the requested
/// range is a session. Good enough for simulations and for exercising clock
/// rollover, which only cares about the ordering contract.
pub struct StaticCalendarSource {
    hours: HashMap<String, ExchangeHours>,
}

impl StaticCalendarSource {
    pub fn new(hours: HashMap<String, ExchangeHours>) -> Result<Self, CalendarError> {
        for (exchange, h) in &hours {
            if h.open >= h.close {
                return Err(CalendarError::InvalidHours {
                    exchange: exchange.clone(),
                    open: h.open,
                    close: h.close,
                });
            }
        }
        Ok(Self { hours })
    }

    /// Convenience constructor for exchanges sharing the same hours.
    pub fn with_uniform_hours(
        exchanges: &[&str],
        open: NaiveTime,
        close: NaiveTime,
    ) -> Result<Self, CalendarError> {
        let hours = exchanges
            .iter()
            .map(|e| (e.to_string(), ExchangeHours { open, close }))
            .collect();
        Self::new(hours)
    }

    pub fn exchanges(&self) -> impl Iterator<Item = &str> {
        self.hours.keys().map(|k| k.as_str())
    }
}

impl CalendarSource for StaticCalendarSource {
    fn window(
        &self,
        exchange: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<CalendarWindow, CalendarError> {
        if start > end {
            return Err(CalendarError::InvalidRange { start, end });
        }
        let hours = self
            .hours
            .get(exchange)
            .ok_or_else(|| CalendarError::UnknownExchange(exchange.to_string()))?;

        let mut sessions = Vec::new();
        let mut day = start;
        while day <= end {
            if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                sessions.push(SessionSchedule {
                    session: day,
                    open: day.and_time(hours.open).and_utc(),
                    close: day.and_time(hours.close).and_utc(),
                });
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        tracing::debug!(
            exchange,
            %start,
            %end,
            sessions = sessions.len(),
            "built calendar window"
        );
        Ok(CalendarWindow {
            exchange: exchange.to_string(),
            sessions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn source() -> StaticCalendarSource {
        StaticCalendarSource::with_uniform_hours(
            &["XNYS"],
            NaiveTime::from_hms_opt(14, 30, 0).unwrap(),
            NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn skips_weekends_and_orders_sessions() {
        // 2023-06-02 is a Friday; the next session must be Monday the 5th.
        let window = source()
            .window("XNYS", date(2023, 6, 2), date(2023, 6, 6))
            .unwrap();
        let days: Vec<_> = window.sessions.iter().map(|s| s.session).collect();
        assert_eq!(
            days,
            vec![date(2023, 6, 2), date(2023, 6, 5), date(2023, 6, 6)]
        );
        assert!(window.sessions.windows(2).all(|w| w[0].open < w[1].open));
    }

    #[test]
    fn weekend_only_range_is_empty_not_an_error() {
        let window = source()
            .window("XNYS", date(2023, 6, 3), date(2023, 6, 4))
            .unwrap();
        assert!(window.is_empty());
    }

    #[test]
    fn unknown_exchange_is_an_error() {
        let err = source()
            .window("XTKS", date(2023, 6, 2), date(2023, 6, 6))
            .unwrap_err();
        assert!(matches!(err, CalendarError::UnknownExchange(_)));
    }

    #[test]
    fn open_must_precede_close() {
        let result = StaticCalendarSource::with_uniform_hours(
            &["XLON"],
            NaiveTime::from_hms_opt(16, 30, 0).unwrap(),
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        );
        assert!(matches!(result, Err(CalendarError::InvalidHours { .. })));
    }
}
