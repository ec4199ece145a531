use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use calendar::CalendarSource;
use clock::{Clock, ClockSettings};
use core_types::ClockEventKind;

use crate::error::ControlError;
use crate::mode::ControlMode;
use crate::session::{RunParams, StopParams};

/// A request injected into a running loop.
#[derive(Debug)]
pub enum LoopCommand {
    Run(Vec<RunParams>),
    Stop(Vec<StopParams>),
}

/// The top-level driver. Single-threaded and discrete-event: each tick
/// advances every registered clock to the minimum pending timestamp,
/// collects the emitted signals, and invokes the control mode once —
/// `process`, `clock_update`, `update`, in that order.
///
/// Clocks are created lazily: a `Run` command resolves its domain inside
/// the control mode, and the loop then builds a clock for every exchange
/// that domain added. The loop ends when every clock is exhausted.
pub struct EventLoop {
    control: ControlMode,
    calendar: Arc<dyn CalendarSource>,
    settings: ClockSettings,
    start: NaiveDate,
    end: NaiveDate,
    clocks: HashMap<String, Clock>,
    commands: mpsc::Receiver<LoopCommand>,
    show_progress: bool,
}

impl EventLoop {
    pub fn new(
        control: ControlMode,
        calendar: Arc<dyn CalendarSource>,
        settings: ClockSettings,
        start: NaiveDate,
        end: NaiveDate,
        show_progress: bool,
    ) -> (Self, mpsc::Sender<LoopCommand>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                control,
                calendar,
                settings,
                start,
                end,
                clocks: HashMap::new(),
                commands: rx,
                show_progress,
            },
            tx,
        )
    }

    pub fn control(&self) -> &ControlMode {
        &self.control
    }

    /// Applies every command currently sitting in the channel.
    async fn drain_commands(&mut self) -> Result<(), ControlError> {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                LoopCommand::Run(params) => {
                    self.control.add_strategies(params).await?;
                    self.ensure_clocks()?;
                }
                LoopCommand::Stop(params) => self.control.stop(params),
            }
        }
        Ok(())
    }

    /// One clock per exchange any running session's domain touches.
    fn ensure_clocks(&mut self) -> Result<(), ControlError> {
        for exchange in self.control.active_exchanges() {
            if self.clocks.contains_key(&exchange) {
                continue;
            }
            let clock = Clock::new(
                exchange.clone(),
                Arc::clone(&self.calendar),
                self.start,
                self.end,
                self.settings,
            )?;
            tracing::debug!(%exchange, "created clock");
            self.clocks.insert(exchange, clock);
        }
        Ok(())
    }

    fn progress_bar(&self) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let days = (self.end - self.start).num_days().max(1) as u64;
        let bar = ProgressBar::new(days);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Some(bar)
    }

    /// Drives the run to completion; returns the number of ticks executed.
    pub async fn run(&mut self) -> Result<u64, ControlError> {
        self.drain_commands().await?;
        let bar = self.progress_bar();
        let mut ticks: u64 = 0;
        let mut current_day: Option<NaiveDate> = None;

        loop {
            self.drain_commands().await?;

            let Some(dt) = self
                .clocks
                .values()
                .filter_map(Clock::peek_timestamp)
                .min()
            else {
                break;
            };

            let mut signals = Vec::new();
            for clock in self.clocks.values_mut() {
                if let Some(signal) = clock.advance(dt)? {
                    signals.push(signal);
                }
            }
            if signals.is_empty() {
                continue;
            }

            // A session-start anywhere drives the tick as a session start;
            // the trackers rely on that to re-enter after a calendar gap.
            let tick_event = signals
                .iter()
                .find(|s| s.event == ClockEventKind::SessionStart)
                .map(|s| s.event)
                .unwrap_or(signals[0].event);

            self.control.process(dt).await?;
            self.control.clock_update(dt, tick_event, &signals).await?;
            self.control.update(dt, tick_event, &signals).await?;
            ticks += 1;

            if let Some(bar) = &bar {
                let day = dt.date_naive();
                if current_day != Some(day) {
                    current_day = Some(day);
                    bar.inc(1);
                }
            }
        }

        if let Some(bar) = &bar {
            bar.finish_with_message("run complete");
        }
        tracing::info!(ticks, "event loop finished");
        Ok(ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use rust_decimal_macros::dec;

    use broker::SimulationBroker;
    use calendar::StaticCalendarSource;
    use core_types::RunMode;
    use domain::{DomainDef, DomainRegistry, ExchangeMapping};
    use events_log::NoOpEventsLog;
    use process_manager::{LocalProcessFactory, ReceivedCall, SimulationProcessManager};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 6, d).unwrap()
    }

    fn calendar() -> Arc<dyn CalendarSource> {
        Arc::new(
            StaticCalendarSource::with_uniform_hours(
                &["XNYS", "XLON"],
                NaiveTime::from_hms_opt(14, 30, 0).unwrap(),
                NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
            )
            .unwrap(),
        )
    }

    fn mapping() -> ExchangeMapping {
        let mut mapping = ExchangeMapping::default();
        mapping
            .by_country
            .insert("US".into(), ["XNYS".to_string()].into_iter().collect());
        mapping
            .by_country
            .insert("GB".into(), ["XLON".to_string()].into_iter().collect());
        mapping.by_asset_type.insert(
            "equity".into(),
            ["XNYS".to_string(), "XLON".to_string()]
                .into_iter()
                .collect(),
        );
        mapping
    }

    fn simulation_loop(
        factory: Arc<LocalProcessFactory>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> (EventLoop, mpsc::Sender<LoopCommand>) {
        let control = ControlMode::new(
            RunMode::Simulation,
            start,
            end,
            DomainRegistry::new(mapping()),
            calendar(),
            Arc::new(SimulationBroker::new(dec!(100000), dec!(3))),
            Arc::new(SimulationProcessManager::new()),
            factory,
            Arc::new(NoOpEventsLog),
        );
        EventLoop::new(
            control,
            calendar(),
            ClockSettings::default(),
            start,
            end,
            false,
        )
    }

    #[tokio::test]
    async fn simulation_run_delivers_an_ordered_stream_per_worker() {
        let factory = Arc::new(LocalProcessFactory::new());
        let (mut event_loop, tx) = simulation_loop(Arc::clone(&factory), date(5), date(6));
        tx.send(LoopCommand::Run(vec![RunParams {
            session_id: "s1".to_string(),
            domain: DomainDef::parse("US:equity GB:equity |").unwrap(),
            capital_ratio: dec!(0.5),
            max_leverage: dec!(2),
        }]))
        .await
        .unwrap();

        let ticks = event_loop.run().await.unwrap();
        assert!(ticks > 0);

        let created = factory.created().await;
        assert_eq!(created.len(), 1);
        let events: Vec<ClockEventKind> = created[0]
            .calls()
            .await
            .iter()
            .filter_map(|c| match c {
                ReceivedCall::ClockUpdate(event) => Some(event.event),
                _ => None,
            })
            .collect();

        // Per session the worker sees start -> before-trading-start ->
        // bar(s) -> one end; never a bar outside a session.
        let mut in_session = false;
        let mut session_ends = 0;
        for event in &events {
            match event {
                ClockEventKind::SessionStart => in_session = true,
                ClockEventKind::SessionEnd => {
                    assert!(in_session, "session end without a start");
                    in_session = false;
                    session_ends += 1;
                }
                ClockEventKind::Bar | ClockEventKind::MinuteEnd => {
                    assert!(in_session, "bar outside a session");
                }
                _ => {}
            }
        }
        assert_eq!(session_ends, 2, "one aggregated end per trading day");
    }

    #[tokio::test]
    async fn weekend_gap_does_not_break_aggregation() {
        let factory = Arc::new(LocalProcessFactory::new());
        // Friday the 2nd through Tuesday the 6th: a weekend sits in the
        // middle of the range.
        let (mut event_loop, tx) = simulation_loop(Arc::clone(&factory), date(2), date(6));
        tx.send(LoopCommand::Run(vec![RunParams {
            session_id: "s1".to_string(),
            domain: DomainDef::leaf("US", "equity"),
            capital_ratio: dec!(1),
            max_leverage: dec!(2),
        }]))
        .await
        .unwrap();

        event_loop.run().await.unwrap();
        let created = factory.created().await;
        let ends = created[0]
            .calls()
            .await
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    ReceivedCall::ClockUpdate(event)
                        if event.event == ClockEventKind::SessionEnd
                )
            })
            .count();
        assert_eq!(ends, 3, "friday, monday and tuesday each close once");
    }
}
