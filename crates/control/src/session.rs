use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clock::SignalTracker;
use domain::{DomainDef, DomainStruct};

/// A request to run one strategy session. Submitted through the loop's
/// command channel; for a session id that is already running it becomes a
/// buffered parameter update instead of a new worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunParams {
    pub session_id: String,
    pub domain: DomainDef,
    pub capital_ratio: Decimal,
    pub max_leverage: Decimal,
}

/// A request to stop a running session, optionally liquidating its
/// positions first. Buffered and applied once per tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopParams {
    pub session_id: String,
    pub liquidate: bool,
}

/// Control-mode bookkeeping for one running strategy instance. The worker
/// itself lives behind the process manager; this is the capital share, the
/// resolved domain and the tracker merging that domain's clocks into the
/// worker's event stream.
pub struct Session {
    pub id: String,
    pub domain_id: Uuid,
    pub capital_ratio: Decimal,
    pub max_leverage: Decimal,
    pub domain: Arc<DomainStruct>,
    pub tracker: SignalTracker,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        domain_id: Uuid,
        capital_ratio: Decimal,
        max_leverage: Decimal,
        domain: Arc<DomainStruct>,
    ) -> Self {
        let mut tracker = SignalTracker::new(domain.exchanges().clone());
        tracker.activate();
        Self {
            id: id.into(),
            domain_id,
            capital_ratio,
            max_leverage,
            domain,
            tracker,
        }
    }
}
