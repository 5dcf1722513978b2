use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use larder_core::{LocationId, ProductId, StockId};

/// One purchased/produced lot of a product, derived from the ledger.
///
/// Created by a purchase/self-production entry and mutated only through
/// ledger replay. Fully consumed batches stay around as zero-amount rows so
/// an undo can restore them; read sides filter on [`StockBatch::in_stock`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBatch {
    pub stock_id: StockId,
    pub product_id: ProductId,

    /// Amount remaining, in stocking units. Never negative.
    pub amount: Decimal,

    pub best_before: Option<NaiveDate>,
    pub purchase_date: Option<NaiveDate>,
    pub price: Option<Decimal>,
    pub location: Option<LocationId>,

    pub open: bool,
    pub opened_at: Option<DateTime<Utc>>,
    /// Amount right before opening, when the tracking mode snapshots it
    /// (supports partial-use accounting).
    pub amount_before_open: Option<Decimal>,
}

impl StockBatch {
    pub fn in_stock(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// Opened portion of this batch (the whole remaining amount when open).
    pub fn opened_amount(&self) -> Decimal {
        if self.open { self.amount } else { Decimal::ZERO }
    }
}
