use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use core_types::{AggregatedEvent, ClockEventKind, Signal};

/// Where a worker's aggregated stream currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// Pre-registration: every signal is ignored.
    Idle,
    /// Waiting for any relevant `SessionStart`.
    InSession,
    /// Session started; waiting for any relevant `BeforeTradingStart`.
    Active,
    /// Accumulating bars; counting `SessionEnd`s until every relevant
    /// exchange has closed.
    Trading,
    /// All exchanges closed; deciding between an immediate next session and
    /// a calendar gap.
    OutSession,
}

/// Per-worker aggregator merging N clocks' signals into one event stream.
///
/// Relevance filtering uses the exchange set of the worker's resolved
/// domain; this is the only place such filtering happens.
pub struct SignalTracker {
    exchanges: BTreeSet<String>,
    state: TrackerState,
    session_end_count: usize,
}

impl SignalTracker {
    pub fn new(exchanges: BTreeSet<String>) -> Self {
        Self {
            exchanges,
            state: TrackerState::Idle,
            session_end_count: 0,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn exchanges(&self) -> &BTreeSet<String> {
        &self.exchanges
    }

    /// Registration: the tracker starts listening for the next session.
    pub fn activate(&mut self) {
        if self.state == TrackerState::Idle {
            self.state = TrackerState::InSession;
        }
    }

    fn relevant<'a>(&self, signals: &'a [Signal]) -> impl Iterator<Item = &'a Signal> {
        signals.iter().filter(|s| self.exchanges.contains(&s.exchange))
    }

    /// Folds one tick's raw signals into at most one aggregated event.
    ///
    /// `tick_event` is the kind the loop is driving this tick with; the
    /// `OutSession` state uses it to distinguish "a new session is starting
    /// somewhere" from a calendar gap (weekends).
    pub fn aggregate(
        &mut self,
        tick_ts: DateTime<Utc>,
        tick_event: ClockEventKind,
        signals: &[Signal],
    ) -> Option<AggregatedEvent> {
        match self.state {
            TrackerState::Idle => None,
            TrackerState::InSession => self.take_session_start(tick_ts, signals),
            TrackerState::Active => {
                let matched: Vec<Signal> = self
                    .relevant(signals)
                    .filter(|s| s.event == ClockEventKind::BeforeTradingStart)
                    .cloned()
                    .collect();
                let last = matched.last()?;
                self.state = TrackerState::Trading;
                Some(AggregatedEvent {
                    timestamp: last.timestamp,
                    event: ClockEventKind::BeforeTradingStart,
                    signals: matched,
                })
            }
            TrackerState::Trading => {
                let relevant: Vec<Signal> = self.relevant(signals).cloned().collect();
                let mut matched = Vec::new();
                let mut timestamp = tick_ts;
                let mut event = None;
                for signal in relevant {
                    match signal.event {
                        ClockEventKind::SessionEnd => {
                            self.session_end_count += 1;
                            if self.session_end_count == self.exchanges.len() {
                                // Every relevant exchange has closed: emit
                                // one SessionEnd, stamped by the last close.
                                self.session_end_count = 0;
                                self.state = TrackerState::OutSession;
                                timestamp = signal.timestamp;
                                event = Some(ClockEventKind::SessionEnd);
                                matched.push(signal);
                            }
                        }
                        ClockEventKind::Bar | ClockEventKind::MinuteEnd => {
                            timestamp = signal.timestamp;
                            if event != Some(ClockEventKind::SessionEnd) {
                                event = Some(signal.event);
                            }
                            matched.push(signal);
                        }
                        _ => {}
                    }
                }
                event.map(|event| AggregatedEvent {
                    timestamp,
                    event,
                    signals: matched,
                })
            }
            TrackerState::OutSession => {
                if tick_event != ClockEventKind::SessionStart {
                    return None;
                }
                let started = self.take_session_start(tick_ts, signals);
                if started.is_none() {
                    // No relevant exchange opened on this session-start
                    // tick: calendar gap, fall back and wait.
                    self.state = TrackerState::InSession;
                }
                started
            }
        }
    }

    fn take_session_start(
        &mut self,
        _tick_ts: DateTime<Utc>,
        signals: &[Signal],
    ) -> Option<AggregatedEvent> {
        let matched: Vec<Signal> = self
            .relevant(signals)
            .filter(|s| s.event == ClockEventKind::SessionStart)
            .cloned()
            .collect();
        let last = matched.last()?;
        self.state = TrackerState::Active;
        Some(AggregatedEvent {
            timestamp: last.timestamp,
            event: ClockEventKind::SessionStart,
            signals: matched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 5, h, m, 0).unwrap()
    }

    fn signal(exchange: &str, t: DateTime<Utc>, event: ClockEventKind) -> Signal {
        Signal {
            exchange: exchange.to_string(),
            timestamp: t,
            event,
        }
    }

    fn tracker() -> SignalTracker {
        let mut t = SignalTracker::new(
            ["XNYS".to_string(), "XLON".to_string()].into_iter().collect(),
        );
        t.activate();
        t
    }

    #[test]
    fn idle_ignores_everything() {
        let mut t = SignalTracker::new(["XNYS".to_string()].into_iter().collect());
        let out = t.aggregate(
            ts(0, 0),
            ClockEventKind::SessionStart,
            &[signal("XNYS", ts(0, 0), ClockEventKind::SessionStart)],
        );
        assert!(out.is_none());
        assert_eq!(t.state(), TrackerState::Idle);
    }

    #[test]
    fn irrelevant_exchanges_are_filtered() {
        let mut t = tracker();
        let out = t.aggregate(
            ts(0, 0),
            ClockEventKind::SessionStart,
            &[signal("XTKS", ts(0, 0), ClockEventKind::SessionStart)],
        );
        assert!(out.is_none());
        assert_eq!(t.state(), TrackerState::InSession);
    }

    #[test]
    fn session_end_waits_for_every_exchange_and_keeps_the_later_stamp() {
        let mut t = tracker();
        t.aggregate(
            ts(0, 0),
            ClockEventKind::SessionStart,
            &[
                signal("XNYS", ts(0, 0), ClockEventKind::SessionStart),
                signal("XLON", ts(0, 0), ClockEventKind::SessionStart),
            ],
        )
        .unwrap();
        t.aggregate(
            ts(8, 0),
            ClockEventKind::BeforeTradingStart,
            &[signal("XLON", ts(8, 0), ClockEventKind::BeforeTradingStart)],
        )
        .unwrap();

        // London closes first: no aggregated SessionEnd yet.
        let t1 = ts(16, 30);
        let out = t.aggregate(
            t1,
            ClockEventKind::SessionEnd,
            &[signal("XLON", t1, ClockEventKind::SessionEnd)],
        );
        assert!(out.is_none());
        assert_eq!(t.state(), TrackerState::Trading);

        // New York closes later: exactly one SessionEnd, stamped t2.
        let t2 = ts(21, 0);
        let out = t
            .aggregate(
                t2,
                ClockEventKind::SessionEnd,
                &[signal("XNYS", t2, ClockEventKind::SessionEnd)],
            )
            .unwrap();
        assert_eq!(out.event, ClockEventKind::SessionEnd);
        assert_eq!(out.timestamp, t2);
        assert_eq!(t.state(), TrackerState::OutSession);
    }

    #[test]
    fn out_session_reenters_active_on_back_to_back_sessions() {
        let mut t = tracker();
        t.state = TrackerState::OutSession;
        let out = t
            .aggregate(
                ts(0, 0),
                ClockEventKind::SessionStart,
                &[signal("XNYS", ts(0, 0), ClockEventKind::SessionStart)],
            )
            .unwrap();
        assert_eq!(out.event, ClockEventKind::SessionStart);
        assert_eq!(t.state(), TrackerState::Active);
    }

    #[test]
    fn out_session_falls_back_over_calendar_gaps() {
        let mut t = tracker();
        t.state = TrackerState::OutSession;
        // A session-start tick where only an irrelevant exchange opens.
        let out = t.aggregate(
            ts(0, 0),
            ClockEventKind::SessionStart,
            &[signal("XTKS", ts(0, 0), ClockEventKind::SessionStart)],
        );
        assert!(out.is_none());
        assert_eq!(t.state(), TrackerState::InSession);

        // Monday: the relevant exchange opens again.
        let out = t.aggregate(
            ts(9, 0),
            ClockEventKind::SessionStart,
            &[signal("XNYS", ts(9, 0), ClockEventKind::SessionStart)],
        );
        assert!(out.is_some());
        assert_eq!(t.state(), TrackerState::Active);
    }

    #[test]
    fn mixed_tick_counts_a_close_while_still_emitting_bars() {
        let mut t = tracker();
        t.state = TrackerState::Trading;
        // One exchange closes while the other still bars on the same tick:
        // the close is counted but the aggregated event stays a Bar.
        let out = t
            .aggregate(
                ts(16, 30),
                ClockEventKind::SessionEnd,
                &[
                    signal("XLON", ts(16, 30), ClockEventKind::SessionEnd),
                    signal("XNYS", ts(16, 30), ClockEventKind::Bar),
                ],
            )
            .unwrap();
        assert_eq!(out.event, ClockEventKind::Bar);
        assert_eq!(t.state(), TrackerState::Trading);

        let out = t
            .aggregate(
                ts(21, 0),
                ClockEventKind::SessionEnd,
                &[signal("XNYS", ts(21, 0), ClockEventKind::SessionEnd)],
            )
            .unwrap();
        assert_eq!(out.event, ClockEventKind::SessionEnd);
        assert_eq!(t.state(), TrackerState::OutSession);
    }

    #[test]
    fn bars_merge_into_one_tick() {
        let mut t = tracker();
        t.state = TrackerState::Trading;
        let out = t
            .aggregate(
                ts(15, 0),
                ClockEventKind::Bar,
                &[
                    signal("XNYS", ts(15, 0), ClockEventKind::Bar),
                    signal("XLON", ts(15, 0), ClockEventKind::Bar),
                    signal("XTKS", ts(15, 0), ClockEventKind::Bar),
                ],
            )
            .unwrap();
        assert_eq!(out.event, ClockEventKind::Bar);
        assert_eq!(out.signals.len(), 2, "irrelevant exchange must be dropped");
    }
}
