use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use larder_core::{EntryId, StockId};

/// Post-movement amount of one touched batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchChange {
    pub stock_id: StockId,
    /// Remaining amount after the movement, in stocking units.
    pub amount: Decimal,
}

/// Result of a committed stock movement.
///
/// Returned to the caller and stored under the idempotency key, so a replayed
/// request gets back exactly what the first attempt produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReceipt {
    /// Groups all ledger entries of this movement.
    pub transaction_id: Uuid,
    /// Appended (or, for undo, reversed) entries in event order.
    pub entry_ids: Vec<EntryId>,
    /// Touched batches with their post-movement amounts, in first-touch order.
    pub batches: Vec<BatchChange>,
}
