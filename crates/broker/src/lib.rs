//! # Broker Crate
//!
//! The capital side of the control plane. The `Broker` owns total capital
//! and leverage headroom, computes per-session allocations, and produces the
//! per-tick `BrokerState` snapshots that are fanned out to workers. Workers
//! call back into it to place and cancel orders; order *matching* happens
//! elsewhere and is out of scope here.

pub mod error;
pub mod simulation;

pub use error::BrokerError;
pub use simulation::SimulationBroker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use core_types::{BrokerState, ClockEventKind, OrderParams, Signal};

/// The capital-and-orders seam between the control mode and whatever is
/// actually holding the money.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Driven once per tick with the same `(dt, evt, signals)` the workers
    /// see. Returns a fresh snapshot when there is something new to push.
    async fn update(
        &self,
        dt: DateTime<Utc>,
        event: ClockEventKind,
        signals: &[Signal],
    ) -> Result<Option<BrokerState>, BrokerError>;

    /// `floor(total_capital * ratio)` — allocations never round up.
    async fn compute_capital(&self, ratio: Decimal) -> Decimal;

    /// Clamps a requested leverage to what the account can support.
    async fn adjust_max_leverage(&self, requested: Decimal) -> Decimal;

    /// Registers the exchanges a session trades on.
    async fn add_market(&self, session_id: &str, exchanges: &[String]);

    /// Registers a session so its orders and fills can be attributed.
    async fn add_session_id(&self, session_id: &str);

    /// Flags a session's positions for liquidation on the next update.
    async fn mark_for_liquidation(&self, session_id: &str);

    // Order entry points consumed by workers over RPC.
    async fn order(&self, params: OrderParams) -> Result<uuid::Uuid, BrokerError>;
    async fn cancel(&self, order_id: uuid::Uuid) -> Result<(), BrokerError>;
    async fn cancel_all_orders_for_asset(
        &self,
        session_id: &str,
        symbol: &str,
    ) -> Result<(), BrokerError>;
    async fn execute_cancel_policy(&self, session_id: &str) -> Result<(), BrokerError>;
}
