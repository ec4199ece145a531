use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;

use broker::Broker;
use calendar::CalendarSource;
use core_types::{ClockEvent, ClockEventKind, RunMode, Signal};
use domain::DomainRegistry;
use events_log::{EventsLog, LogEventType, LoggedEvent};
use process_manager::{
    InitParams, ParameterUpdate, Process, ProcessError, ProcessFactory, ProcessManager,
};

use crate::error::ControlError;
use crate::session::{RunParams, Session, StopParams};

/// A parameter change waiting for the next tick boundary.
struct BufferedUpdate {
    session_id: String,
    capital_ratio: Decimal,
    max_leverage: Decimal,
}

/// The orchestrator: owns capital allocation, the broker, and the running
/// sessions, and translates run/stop requests into per-worker calls.
///
/// Simulation and live runs share this one implementation; the wiring
/// differs only in the injected manager, events log and broker. Per tick
/// the fan-out order is fixed and journaled in the same order: stops,
/// parameter updates, the clock event, then the broker snapshot.
pub struct ControlMode {
    run_mode: RunMode,
    start: NaiveDate,
    end: NaiveDate,
    registry: DomainRegistry,
    calendar: Arc<dyn CalendarSource>,
    broker: Arc<dyn Broker>,
    manager: Arc<dyn ProcessManager>,
    factory: Arc<dyn ProcessFactory>,
    events_log: Arc<dyn EventsLog>,
    sessions: HashMap<String, Session>,
    pending_updates: Vec<BufferedUpdate>,
    pending_stops: Vec<StopParams>,
}

impl ControlMode {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_mode: RunMode,
        start: NaiveDate,
        end: NaiveDate,
        registry: DomainRegistry,
        calendar: Arc<dyn CalendarSource>,
        broker: Arc<dyn Broker>,
        manager: Arc<dyn ProcessManager>,
        factory: Arc<dyn ProcessFactory>,
        events_log: Arc<dyn EventsLog>,
    ) -> Self {
        Self {
            run_mode,
            start,
            end,
            registry,
            calendar,
            broker,
            manager,
            factory,
            events_log,
            sessions: HashMap::new(),
            pending_updates: Vec::new(),
            pending_stops: Vec::new(),
        }
    }

    /// Every exchange some running session's domain contains. The loop
    /// creates clocks lazily from this set.
    pub fn active_exchanges(&self) -> BTreeSet<String> {
        self.sessions
            .values()
            .flat_map(|s| s.domain.exchanges().iter().cloned())
            .collect()
    }

    pub fn has_sessions(&self) -> bool {
        !self.sessions.is_empty()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// Known sessions per exchange over a date range, fetched from the
    /// calendar source for every exchange the mapping can resolve to.
    fn sessions_per_exchange(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashMap<String, BTreeSet<NaiveDate>>, ControlError> {
        let mapping = self.registry.mapping();
        let exchanges: BTreeSet<String> = mapping
            .by_country
            .values()
            .chain(mapping.by_asset_type.values())
            .flat_map(|set| set.iter().cloned())
            .collect();
        let mut per_exchange = HashMap::new();
        for exchange in exchanges {
            let window = self.calendar.window(&exchange, start, end)?;
            let sessions: BTreeSet<NaiveDate> =
                window.sessions.iter().map(|s| s.session).collect();
            per_exchange.insert(exchange, sessions);
        }
        Ok(per_exchange)
    }

    /// Validates and applies a batch of run requests.
    ///
    /// The capital invariant is checked first, against every ratio that
    /// would be live after the batch: sessions the manager no longer knows
    /// (stopped or permanently failed) are reaped beforehand, so their
    /// ratios are free again. Nothing is created until the whole batch
    /// validates. New sessions get a worker, a broker registration and an
    /// `initialize` call; already-running ones become buffered parameter
    /// updates applied at the next tick.
    pub async fn add_strategies(&mut self, params: Vec<RunParams>) -> Result<(), ControlError> {
        let live: BTreeSet<String> = self.manager.session_ids().await.into_iter().collect();
        self.sessions.retain(|id, _| live.contains(id));

        let mut total = Decimal::ZERO;
        for session in self.sessions.values() {
            if !params.iter().any(|p| p.session_id == session.id) {
                // A buffered update supersedes the applied ratio even
                // before its tick boundary flushes it.
                total += self.buffered_ratio(&session.id).unwrap_or(session.capital_ratio);
            }
        }
        for request in &params {
            total += request.capital_ratio;
        }
        if total > Decimal::ONE {
            return Err(ControlError::CapitalExhausted { requested: total });
        }

        let per_exchange = self.sessions_per_exchange(self.start, self.end)?;

        for request in params {
            if self.sessions.contains_key(&request.session_id) {
                tracing::info!(
                    session_id = %request.session_id,
                    ratio = %request.capital_ratio,
                    "buffered parameter update for running session"
                );
                self.pending_updates.push(BufferedUpdate {
                    session_id: request.session_id,
                    capital_ratio: request.capital_ratio,
                    max_leverage: request.max_leverage,
                });
                continue;
            }

            let (domain_id, resolved) = self.registry.resolve(&request.domain, &per_exchange)?;
            let capital = self.broker.compute_capital(request.capital_ratio).await;
            let max_leverage = self.broker.adjust_max_leverage(request.max_leverage).await;
            let exchanges: Vec<String> = resolved.exchanges().iter().cloned().collect();

            let controllable = self.factory.create(&request.session_id).await?;
            let checkpoint = self.start.and_time(NaiveTime::MIN).and_utc();
            let process = Process::new(&request.session_id, checkpoint, controllable);

            self.broker
                .add_market(&request.session_id, &exchanges)
                .await;
            self.broker.add_session_id(&request.session_id).await;

            process
                .initialize(&InitParams {
                    session_id: request.session_id.clone(),
                    run_mode: self.run_mode,
                    capital,
                    max_leverage,
                    exchanges,
                    start: checkpoint,
                    end: self.end.and_time(NaiveTime::MIN).and_utc(),
                })
                .await
                .map_err(ProcessError::from)?;
            self.manager.register(process).await?;

            tracing::info!(
                session_id = %request.session_id,
                %domain_id,
                %capital,
                %max_leverage,
                "session started"
            );
            self.sessions.insert(
                request.session_id.clone(),
                Session::new(
                    request.session_id,
                    domain_id,
                    request.capital_ratio,
                    max_leverage,
                    resolved,
                ),
            );
        }
        Ok(())
    }

    /// The most recent buffered ratio for a session, if any.
    fn buffered_ratio(&self, session_id: &str) -> Option<Decimal> {
        self.pending_updates
            .iter()
            .rev()
            .find(|u| u.session_id == session_id)
            .map(|u| u.capital_ratio)
    }

    /// Buffers stop requests; they take effect on the next `process` call.
    pub fn stop(&mut self, params: Vec<StopParams>) {
        self.pending_stops.extend(params);
    }

    /// Flushes the buffered stop and parameter requests, in that order,
    /// journaling each applied action. Called once per tick, before the
    /// clock fan-out.
    pub async fn process(&mut self, dt: DateTime<Utc>) -> Result<(), ControlError> {
        for stop in std::mem::take(&mut self.pending_stops) {
            if !self.sessions.contains_key(&stop.session_id) {
                tracing::warn!(session_id = %stop.session_id, "stop for unknown session ignored");
                continue;
            }
            if stop.liquidate {
                self.broker.mark_for_liquidation(&stop.session_id).await;
            }
            self.events_log
                .write_event(&LoggedEvent {
                    event_type: LogEventType::Stop,
                    timestamp: dt,
                    session_id: Some(stop.session_id.clone()),
                    payload: serde_json::json!({ "liquidate": stop.liquidate }),
                })
                .await?;
            // Blocks until the worker confirms liquidation is complete.
            self.manager.stop(&stop.session_id, stop.liquidate).await?;
            self.manager.deregister(&stop.session_id).await?;
            self.sessions.remove(&stop.session_id);
            tracing::info!(session_id = %stop.session_id, liquidate = stop.liquidate, "session stopped");
        }

        for update in std::mem::take(&mut self.pending_updates) {
            let capital = self.broker.compute_capital(update.capital_ratio).await;
            let max_leverage = self.broker.adjust_max_leverage(update.max_leverage).await;
            let parameter_update = ParameterUpdate {
                timestamp: dt,
                capital,
                max_leverage,
            };
            self.events_log
                .write_event(&LoggedEvent {
                    event_type: LogEventType::Parameter,
                    timestamp: dt,
                    session_id: Some(update.session_id.clone()),
                    payload: serde_json::to_value(&parameter_update)?,
                })
                .await?;
            self.manager
                .parameter_update(&update.session_id, parameter_update)
                .await?;
            if let Some(session) = self.sessions.get_mut(&update.session_id) {
                session.capital_ratio = update.capital_ratio;
                session.max_leverage = max_leverage;
            }
        }
        Ok(())
    }

    /// One tick's clock fan-out: aggregate the raw signals per session
    /// through its tracker, journal the tick, and dispatch. A session-start
    /// tick also opens a new journal checkpoint and moves every session's
    /// recovery checkpoint forward.
    pub async fn clock_update(
        &mut self,
        dt: DateTime<Utc>,
        event: ClockEventKind,
        signals: &[Signal],
    ) -> Result<(), ControlError> {
        // The very first tick a clock emits is Initialize, ahead of any
        // SessionStart; the journal must already have an open checkpoint
        // when its datetime is recorded.
        if matches!(
            event,
            ClockEventKind::Initialize | ClockEventKind::SessionStart
        ) {
            self.events_log.initialize(dt).await?;
            let live: BTreeSet<String> =
                self.manager.session_ids().await.into_iter().collect();
            for id in self.sessions.keys() {
                if live.contains(id) {
                    self.manager.mark_checkpoint(id, dt).await?;
                }
            }
        }
        self.events_log.write_datetime(dt).await?;

        if signals.iter().any(|s| s.event == ClockEventKind::Calendar) {
            self.rollover_domains(dt).await?;
        }

        let real_timestamp = Utc::now();
        let mut updates = Vec::new();
        for session in self.sessions.values_mut() {
            if let Some(aggregated) = session.tracker.aggregate(dt, event, signals) {
                updates.push((
                    session.id.clone(),
                    ClockEvent {
                        timestamp: aggregated.timestamp,
                        real_timestamp,
                        event: aggregated.event,
                        signals: aggregated.signals,
                    },
                ));
            }
        }
        if updates.is_empty() {
            return Ok(());
        }

        self.events_log
            .write_event(&LoggedEvent {
                event_type: LogEventType::Clock,
                timestamp: dt,
                session_id: None,
                payload: serde_json::json!({
                    "event": event,
                    "signals": signals,
                }),
            })
            .await?;

        // Live managers route worker failures into recovery; only the
        // simulation manager lets them surface here.
        self.manager.clock_update(updates).await?;
        Ok(())
    }

    /// Drives the broker with the tick; a fresh snapshot is serialized
    /// once, journaled, and fanned out to every active process.
    pub async fn update(
        &mut self,
        dt: DateTime<Utc>,
        event: ClockEventKind,
        signals: &[Signal],
    ) -> Result<(), ControlError> {
        let Some(state) = self.broker.update(dt, event, signals).await? else {
            return Ok(());
        };
        self.events_log
            .write_event(&LoggedEvent {
                event_type: LogEventType::Broker,
                timestamp: dt,
                session_id: None,
                payload: serde_json::to_value(&state)?,
            })
            .await?;
        self.manager.account_update(state).await?;
        Ok(())
    }

    /// Recomputes every session's domain against a refreshed calendar
    /// window. Triggered by clock rollovers, so a domain's session index is
    /// never read past its end.
    async fn rollover_domains(&mut self, dt: DateTime<Utc>) -> Result<(), ControlError> {
        let per_exchange = self.sessions_per_exchange(dt.date_naive(), self.end)?;
        let ids: BTreeSet<uuid::Uuid> =
            self.sessions.values().map(|s| s.domain_id).collect();
        for id in ids {
            let refreshed = self.registry.rollover(&id, &per_exchange)?;
            for session in self.sessions.values_mut() {
                if session.domain_id == id {
                    session.domain = Arc::clone(&refreshed);
                }
            }
        }
        Ok(())
    }
}
