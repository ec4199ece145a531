use std::collections::HashMap;
use std::path::PathBuf;

use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::Deserialize;

use core_types::RunMode;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Whether the control plane runs fully in-process or against real
    /// workers with recovery enabled.
    pub run_mode: RunMode,
    pub broker: BrokerSettings,
    pub clock: ClockSettings,
    pub calendar: CalendarSettings,
    pub mapping: MappingSettings,
    pub recovery: RecoverySettings,
    pub events_log: EventsLogSettings,
}

/// Capital and leverage limits shared by every session.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSettings {
    /// The total capital pool split between sessions by their ratios.
    pub total_capital: Decimal,
    /// The hard leverage ceiling; per-session requests are clamped to it.
    pub max_leverage: Decimal,
}

/// Timing knobs for the per-exchange clocks.
#[derive(Debug, Clone, Deserialize)]
pub struct ClockSettings {
    /// When true, every bar is followed by a minute-end event.
    pub minute_emission: bool,
    /// How long before the open the before-trading-start event fires.
    pub before_trading_start_offset_minutes: i64,
    /// How many calendar days each generated window covers.
    pub window_days: i64,
}

/// Fixed open and close times for one exchange, used by the static
/// calendar source in simulation runs. All times are UTC.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeHoursSettings {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarSettings {
    pub exchanges: HashMap<String, ExchangeHoursSettings>,
}

/// The leaf-resolution tables for the domain algebra: which exchanges a
/// country code and an asset type map to.
#[derive(Debug, Clone, Deserialize)]
pub struct MappingSettings {
    pub countries: HashMap<String, Vec<String>>,
    pub asset_types: HashMap<String, Vec<String>>,
}

/// Retry schedule applied when a live worker dies mid-run.
#[derive(Debug, Clone, Deserialize)]
pub struct RecoverySettings {
    pub max_attempts: u32,
    /// Initial delay; doubles after each failed attempt.
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsLogSettings {
    /// Directory holding the sqlite index and the journal files.
    pub root: PathBuf,
}
