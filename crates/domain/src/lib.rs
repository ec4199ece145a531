//! # Domain Crate
//!
//! The domain algebra: a strategy declares its tradeable universe as a
//! set-algebra expression over (country, asset type) leaves, and the control
//! plane resolves it into a `DomainStruct` — the concrete exchanges and the
//! merged trading schedule the strategy runs against.
//!
//! Expressions are postfix sequences evaluated on a stack: push leaf
//! domains, pop two on an operator, apply the set operation to both the
//! exchange set and the session set. The same expression always resolves to
//! the same stable `DomainId`, which the `DomainRegistry` uses as a cache
//! key so one expression maps to one resolved struct and one clock set.

pub mod algebra;
pub mod error;
pub mod registry;

pub use algebra::{
    DomainDef, DomainOp, DomainStruct, DomainTerm, ExchangeMapping, compute_domain, domain_id,
};
pub use error::DomainError;
pub use registry::DomainRegistry;
