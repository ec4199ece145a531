use serde::{Deserialize, Serialize};

/// One discrete scheduling signal emitted by a per-exchange clock.
///
/// The variants form a closed set that is matched exhaustively everywhere a
/// clock event is consumed; there is no out-of-band event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClockEventKind {
    /// Emitted once, on the very first advance of a clock.
    Initialize,
    SessionStart,
    BeforeTradingStart,
    Bar,
    /// Paired with `Bar` when minute emission is enabled.
    MinuteEnd,
    SessionEnd,
    /// Replaces the next `SessionStart` after a stop request with liquidation.
    Liquidate,
    /// Replaces the next `SessionStart` after a plain stop request, and is
    /// also the final event of an exhausted clock.
    Stop,
    /// Signals that the clock rolled over onto a freshly fetched calendar
    /// window; consumers may need to reload calendar-derived state.
    Calendar,
}

/// How the control plane is wired: everything in-process and synchronous, or
/// against real workers with recovery enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Simulation,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side of the order
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}
