use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use core_types::{
    AccountSnapshot, BrokerState, ClockEventKind, OrderParams, OrderRecord, Signal,
    TransactionRecord,
};

use crate::{Broker, BrokerError};

#[derive(Default)]
struct Book {
    sessions: HashSet<String>,
    markets: HashMap<String, Vec<String>>,
    to_liquidate: HashSet<String>,
    open_orders: HashMap<Uuid, OrderRecord>,
    /// Fills since the last emitted snapshot.
    pending_transactions: Vec<TransactionRecord>,
}

/// In-memory broker for simulation and paper runs: tracks capital, sessions
/// and orders, and emits a snapshot whenever a tick closed something out.
/// Positions held by a liquidating session are flattened into synthetic
/// closing transactions on the next update.
pub struct SimulationBroker {
    total_capital: Decimal,
    max_leverage: Decimal,
    book: Mutex<Book>,
}

impl SimulationBroker {
    pub fn new(total_capital: Decimal, max_leverage: Decimal) -> Self {
        Self {
            total_capital,
            max_leverage,
            book: Mutex::new(Book::default()),
        }
    }

    pub fn total_capital(&self) -> Decimal {
        self.total_capital
    }

    /// Snapshot-worthy ticks: session close and minute end, matching the
    /// cadence at which workers expect account updates.
    fn snapshot_due(event: ClockEventKind) -> bool {
        matches!(
            event,
            ClockEventKind::SessionEnd | ClockEventKind::MinuteEnd
        )
    }
}

#[async_trait]
impl Broker for SimulationBroker {
    async fn update(
        &self,
        dt: DateTime<Utc>,
        event: ClockEventKind,
        _signals: &[Signal],
    ) -> Result<Option<BrokerState>, BrokerError> {
        let mut book = self.book.lock().await;

        // Liquidations first: cancel the session's resting orders and
        // synthesize the closing fills.
        let to_liquidate: Vec<String> = book.to_liquidate.drain().collect();
        for session_id in to_liquidate {
            let cancelled: Vec<Uuid> = book
                .open_orders
                .iter()
                .filter(|(_, o)| o.session_id == session_id)
                .map(|(id, _)| *id)
                .collect();
            for order_id in &cancelled {
                if let Some(order) = book.open_orders.remove(order_id) {
                    book.pending_transactions.push(TransactionRecord {
                        transaction_id: Uuid::new_v4(),
                        session_id: order.session_id,
                        symbol: order.symbol,
                        side: order.side.opposite(),
                        amount: order.amount,
                        price: order.limit_price.unwrap_or_default(),
                        timestamp: dt,
                    });
                }
            }
            tracing::info!(session_id = %session_id, cancelled = cancelled.len(), "liquidated session");
        }

        if !Self::snapshot_due(event) && book.pending_transactions.is_empty() {
            return Ok(None);
        }

        let transactions = std::mem::take(&mut book.pending_transactions);
        let orders: Vec<OrderRecord> = book.open_orders.values().cloned().collect();
        Ok(Some(BrokerState {
            timestamp: dt,
            transactions,
            commissions: Vec::new(),
            orders,
            account: AccountSnapshot {
                total_capital: self.total_capital,
                available_capital: self.total_capital,
                max_leverage: self.max_leverage,
            },
        }))
    }

    async fn compute_capital(&self, ratio: Decimal) -> Decimal {
        (self.total_capital * ratio).floor()
    }

    async fn adjust_max_leverage(&self, requested: Decimal) -> Decimal {
        requested.min(self.max_leverage)
    }

    async fn add_market(&self, session_id: &str, exchanges: &[String]) {
        let mut book = self.book.lock().await;
        book.markets
            .insert(session_id.to_string(), exchanges.to_vec());
    }

    async fn add_session_id(&self, session_id: &str) {
        let mut book = self.book.lock().await;
        book.sessions.insert(session_id.to_string());
    }

    async fn mark_for_liquidation(&self, session_id: &str) {
        let mut book = self.book.lock().await;
        book.to_liquidate.insert(session_id.to_string());
    }

    async fn order(&self, params: OrderParams) -> Result<Uuid, BrokerError> {
        let mut book = self.book.lock().await;
        if !book.sessions.contains(&params.session_id) {
            return Err(BrokerError::UnknownSession(params.session_id));
        }
        if params.amount <= Decimal::ZERO {
            return Err(BrokerError::OrderRejected {
                session_id: params.session_id,
                reason: "non-positive amount".to_string(),
            });
        }
        let order_id = Uuid::new_v4();
        book.open_orders.insert(
            order_id,
            OrderRecord {
                order_id,
                session_id: params.session_id,
                symbol: params.symbol,
                side: params.side,
                amount: params.amount,
                limit_price: params.limit_price,
                placed_at: Utc::now(),
            },
        );
        Ok(order_id)
    }

    async fn cancel(&self, order_id: Uuid) -> Result<(), BrokerError> {
        let mut book = self.book.lock().await;
        book.open_orders
            .remove(&order_id)
            .map(|_| ())
            .ok_or(BrokerError::UnknownOrder(order_id))
    }

    async fn cancel_all_orders_for_asset(
        &self,
        session_id: &str,
        symbol: &str,
    ) -> Result<(), BrokerError> {
        let mut book = self.book.lock().await;
        book.open_orders
            .retain(|_, o| !(o.session_id == session_id && o.symbol == symbol));
        Ok(())
    }

    async fn execute_cancel_policy(&self, session_id: &str) -> Result<(), BrokerError> {
        let mut book = self.book.lock().await;
        book.open_orders.retain(|_, o| o.session_id != session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::OrderSide;
    use rust_decimal_macros::dec;

    fn broker() -> SimulationBroker {
        SimulationBroker::new(dec!(100000), dec!(3))
    }

    #[tokio::test]
    async fn capital_is_floored_never_rounded_up() {
        let b = SimulationBroker::new(dec!(100001), dec!(3));
        assert_eq!(b.compute_capital(dec!(0.5)).await, dec!(50000));
        assert_eq!(b.compute_capital(dec!(0.3)).await, dec!(30000));
    }

    #[tokio::test]
    async fn leverage_is_clamped() {
        let b = broker();
        assert_eq!(b.adjust_max_leverage(dec!(10)).await, dec!(3));
        assert_eq!(b.adjust_max_leverage(dec!(2)).await, dec!(2));
    }

    #[tokio::test]
    async fn orders_require_a_registered_session() {
        let b = broker();
        let params = OrderParams {
            session_id: "s1".to_string(),
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            amount: dec!(10),
            limit_price: None,
        };
        assert!(matches!(
            b.order(params.clone()).await,
            Err(BrokerError::UnknownSession(_))
        ));
        b.add_session_id("s1").await;
        assert!(b.order(params).await.is_ok());
    }

    #[tokio::test]
    async fn liquidation_cancels_orders_and_reports_fills() {
        let b = broker();
        b.add_session_id("s1").await;
        b.order(OrderParams {
            session_id: "s1".to_string(),
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            amount: dec!(10),
            limit_price: Some(dec!(150)),
        })
        .await
        .unwrap();

        b.mark_for_liquidation("s1").await;
        let state = b
            .update(Utc::now(), ClockEventKind::Bar, &[])
            .await
            .unwrap()
            .expect("liquidation must force a snapshot");
        assert_eq!(state.transactions.len(), 1);
        assert_eq!(state.transactions[0].side, OrderSide::Sell);
        assert!(state.orders.is_empty());
    }

    #[tokio::test]
    async fn quiet_bars_produce_no_snapshot() {
        let b = broker();
        assert!(
            b.update(Utc::now(), ClockEventKind::Bar, &[])
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            b.update(Utc::now(), ClockEventKind::SessionEnd, &[])
                .await
                .unwrap()
                .is_some()
        );
    }
}
