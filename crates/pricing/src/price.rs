use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use larder_core::{EntryId, StockId};
use larder_planner::rank_batches;
use larder_products::Product;
use larder_stock::{LedgerEntry, StockBatch, TransactionKind, effective_original_amount};
use larder_units::ConversionGraph;

/// One priced acquisition, as it enters aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub entry_id: EntryId,
    pub stock_id: StockId,
    pub purchase_date: Option<NaiveDate>,
    /// Amount in stocking units; for edited batches the reconciled original
    /// amount, not the corrected remainder.
    pub amount: Decimal,
    /// Price per stocking unit.
    pub price: Decimal,
}

/// Collect the priced acquisitions of a product's ledger.
///
/// Unedited batches contribute their non-undone addition entries. An edited
/// batch contributes only its newest correction entry, weighted by the
/// reconciled original amount. Points without a positive amount and price are
/// dropped.
pub fn eligible_entries(entries: &[LedgerEntry]) -> Vec<PricePoint> {
    // Newest effective edit per batch; later entries overwrite earlier ones.
    let mut newest_edit: BTreeMap<StockId, EntryId> = BTreeMap::new();
    for entry in entries {
        if entry.kind == TransactionKind::StockEditNew && entry.is_effective() {
            newest_edit.insert(entry.stock_id, entry.id);
        }
    }

    let mut points = Vec::new();
    for entry in entries {
        if !entry.is_effective() {
            continue;
        }
        let point = if let Some(edit_id) = newest_edit.get(&entry.stock_id) {
            if entry.id != *edit_id {
                continue;
            }
            effective_original_amount(entries, entry.stock_id).map(|amount| PricePoint {
                entry_id: entry.id,
                stock_id: entry.stock_id,
                purchase_date: entry.purchase_date,
                amount,
                price: entry.price.unwrap_or(Decimal::ZERO),
            })
        } else if entry.kind.is_addition_kind() {
            entry.price.map(|price| PricePoint {
                entry_id: entry.id,
                stock_id: entry.stock_id,
                purchase_date: entry.purchase_date,
                amount: entry.amount,
                price,
            })
        } else {
            None
        };

        if let Some(point) = point {
            if point.amount > Decimal::ZERO && point.price > Decimal::ZERO {
                points.push(point);
            }
        }
    }

    points
}

/// Amount-weighted average acquisition price, per stocking unit.
pub fn average_price(entries: &[LedgerEntry]) -> Option<Decimal> {
    let points = eligible_entries(entries);
    let total_amount: Decimal = points.iter().map(|p| p.amount).sum();
    if total_amount <= Decimal::ZERO {
        return None;
    }
    let total_value: Decimal = points.iter().map(|p| p.amount * p.price).sum();
    Some(total_value / total_amount)
}

/// Priced acquisitions ordered by purchase date, then ledger order.
pub fn price_history(entries: &[LedgerEntry]) -> Vec<PricePoint> {
    let mut points = eligible_entries(entries);
    points.sort_by_key(|p| (p.purchase_date.is_none(), p.purchase_date));
    points
}

/// Price of the stock that would be consumed next, per pricing unit.
///
/// With stock on hand this is the first-ranked batch's price; with nothing in
/// stock it falls back to the most recent acquisition price. Conversion from
/// the stocking to the pricing unit is advisory (factor 1 when no path
/// exists), since a price per stocking unit `p` covers `f` pricing units the
/// converted price is `p / f`.
pub fn current_price(
    product: &Product,
    batches: &[StockBatch],
    entries: &[LedgerEntry],
    graph: &ConversionGraph,
) -> Option<Decimal> {
    let stocking_price = rank_batches(product, batches)
        .first()
        .and_then(|batch| batch.price)
        .or_else(|| latest_acquisition_price(entries));

    stocking_price.map(|price| {
        let factor = graph.resolve_or_one(
            product.id,
            product.stocking_unit,
            product.stocking_unit,
            product.pricing_unit,
        );
        price / factor
    })
}

fn latest_acquisition_price(entries: &[LedgerEntry]) -> Option<Decimal> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, e)| {
            e.is_effective()
                && matches!(
                    e.kind,
                    TransactionKind::Purchase | TransactionKind::SelfProduction
                )
                && e.price.is_some()
        })
        .max_by_key(|(position, e)| (e.purchase_date, *position))
        .and_then(|(_, e)| e.price)
}
