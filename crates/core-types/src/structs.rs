use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::{ClockEventKind, OrderSide};

/// One raw signal from one exchange clock: "this event happened at this time
/// on this exchange". Signals are never stored outside the events log; they
/// are consumed within the tick that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub exchange: String,
    pub timestamp: DateTime<Utc>,
    pub event: ClockEventKind,
}

/// The aggregated view a worker sees: one event kind, one timestamp, and the
/// per-exchange signals that were merged into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedEvent {
    pub timestamp: DateTime<Utc>,
    pub event: ClockEventKind,
    pub signals: Vec<Signal>,
}

/// The payload fanned out to every active worker on a tick. Carries both the
/// simulation timestamp and the wall-clock timestamp so workers can measure
/// dispatch lag in live runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockEvent {
    pub timestamp: DateTime<Utc>,
    pub real_timestamp: DateTime<Utc>,
    pub event: ClockEventKind,
    pub signals: Vec<Signal>,
}

/// A fill reported by the broker in a state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: Uuid,
    pub session_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub transaction_id: Uuid,
    pub cost: Decimal,
}

/// An order resting with the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: Uuid,
    pub session_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub amount: Decimal,
    pub limit_price: Option<Decimal>,
    pub placed_at: DateTime<Utc>,
}

/// Parameters for placing one order with the broker. Workers call into the
/// broker with these; the control plane itself never builds them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderParams {
    pub session_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub amount: Decimal,
    pub limit_price: Option<Decimal>,
}

/// Account-level fields included in every broker snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub total_capital: Decimal,
    pub available_capital: Decimal,
    pub max_leverage: Decimal,
}

/// The snapshot pushed to workers after a broker update. Serialized once per
/// tick and fanned out as bytes to every active process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerState {
    pub timestamp: DateTime<Utc>,
    pub transactions: Vec<TransactionRecord>,
    pub commissions: Vec<CommissionRecord>,
    pub orders: Vec<OrderRecord>,
    pub account: AccountSnapshot,
}
