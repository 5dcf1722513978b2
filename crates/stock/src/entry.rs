use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use larder_core::{EntryId, LocationId, ProductId, StockId, TenantId, UserId};

/// Kind of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionKind {
    Purchase,
    Consume,
    InventoryCorrection,
    ProductOpened,
    StockEditOld,
    StockEditNew,
    SelfProduction,
}

impl TransactionKind {
    /// Kinds that add stock when their amount is positive and are eligible
    /// for price aggregation.
    pub fn is_addition_kind(self) -> bool {
        matches!(
            self,
            TransactionKind::Purchase
                | TransactionKind::SelfProduction
                | TransactionKind::InventoryCorrection
        )
    }
}

/// One immutable row of the stock ledger.
///
/// Entries are never deleted or rewritten; the only mutation ever applied is
/// flipping `undone` (with its timestamp) through an undo event. Amounts are
/// signed — positive for additions, negative for removals — and always
/// expressed in the product's stocking unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    /// Correlates this entry to its batch across the batch's lifetime.
    pub stock_id: StockId,
    pub kind: TransactionKind,
    pub amount: Decimal,

    pub best_before: Option<NaiveDate>,
    pub purchase_date: Option<NaiveDate>,
    pub used_date: Option<NaiveDate>,

    pub price: Option<Decimal>,
    pub location: Option<LocationId>,

    /// Groups the entries of one logical movement (e.g. a consumption that
    /// spans several batches).
    pub transaction_id: Uuid,
    pub user_id: Option<UserId>,
    pub note: Option<String>,

    pub undone: bool,
    pub undone_at: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Entry still counts towards derived state.
    pub fn is_effective(&self) -> bool {
        !self.undone
    }

    /// Negative-amount movement (consumption or downward correction).
    pub fn is_removal(&self) -> bool {
        self.amount < Decimal::ZERO
    }
}
