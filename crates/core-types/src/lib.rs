pub mod enums;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{ClockEventKind, OrderSide, RunMode};
pub use structs::{
    AccountSnapshot, AggregatedEvent, BrokerState, ClockEvent, CommissionRecord, OrderParams,
    OrderRecord, Signal, TransactionRecord,
};
