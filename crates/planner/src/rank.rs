use chrono::NaiveDate;

use larder_core::{LocationId, StockId};
use larder_products::Product;
use larder_stock::StockBatch;

/// Sort key for consumption preference. Tuple ordering encodes the rules:
/// location match first, opened batches first, earliest best-before with
/// undated batches last, earliest purchase date, stock id as the final
/// deterministic tie-break.
type RankKey = (
    bool,
    bool,
    (bool, Option<NaiveDate>),
    (bool, Option<NaiveDate>),
    StockId,
);

fn rank_key(batch: &StockBatch, preferred_location: Option<LocationId>) -> RankKey {
    let at_preferred_location =
        preferred_location.is_some() && batch.location == preferred_location;
    (
        !at_preferred_location,
        !batch.open,
        (batch.best_before.is_none(), batch.best_before),
        (batch.purchase_date.is_none(), batch.purchase_date),
        batch.stock_id,
    )
}

/// Rank a product's in-stock batches into consumption order.
///
/// Empty batches are filtered out; the remainder forms a total order, so the
/// result is stable across calls on the same state.
pub fn rank_batches<'a>(product: &Product, batches: &'a [StockBatch]) -> Vec<&'a StockBatch> {
    let mut ranked: Vec<&StockBatch> = batches.iter().filter(|b| b.in_stock()).collect();
    ranked.sort_by_key(|b| rank_key(b, product.default_consume_location));
    ranked
}

/// Ranking across batches of several products (substitution). The owning
/// product's location preference does not apply here; the caller's preferred
/// location does.
pub(crate) fn rank_key_for_location(
    batch: &StockBatch,
    preferred_location: Option<LocationId>,
) -> RankKey {
    rank_key(batch, preferred_location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use larder_core::{ProductId, TenantId, UnitId};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn product() -> Product {
        Product::with_single_unit(ProductId::new(), TenantId::new(), "Milk", UnitId::new())
            .unwrap()
    }

    fn batch(product_id: ProductId, amount: Decimal) -> StockBatch {
        StockBatch {
            stock_id: StockId::new(),
            product_id,
            amount,
            best_before: None,
            purchase_date: None,
            price: None,
            location: None,
            open: false,
            opened_at: None,
            amount_before_open: None,
        }
    }

    #[test]
    fn empty_batches_are_excluded() {
        let product = product();
        let batches = vec![
            batch(product.id, Decimal::ZERO),
            batch(product.id, dec!(3)),
        ];
        let ranked = rank_batches(&product, &batches);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].amount, dec!(3));
    }

    #[test]
    fn open_batch_outranks_earlier_best_before() {
        let product = product();
        let mut dated = batch(product.id, dec!(5));
        dated.best_before = NaiveDate::from_ymd_opt(2024, 1, 1);
        let mut opened = batch(product.id, dec!(5));
        opened.best_before = NaiveDate::from_ymd_opt(2024, 6, 1);
        opened.open = true;
        opened.opened_at = Some(Utc::now());

        let batches = vec![dated, opened.clone()];
        let ranked = rank_batches(&product, &batches);
        assert_eq!(ranked[0].stock_id, opened.stock_id);
    }

    #[test]
    fn earlier_best_before_wins_and_undated_goes_last() {
        let product = product();
        let undated = batch(product.id, dec!(1));
        let mut late = batch(product.id, dec!(1));
        late.best_before = NaiveDate::from_ymd_opt(2024, 9, 1);
        let mut early = batch(product.id, dec!(1));
        early.best_before = NaiveDate::from_ymd_opt(2024, 2, 1);

        let batches = vec![undated.clone(), late.clone(), early.clone()];
        let ranked = rank_batches(&product, &batches);
        assert_eq!(ranked[0].stock_id, early.stock_id);
        assert_eq!(ranked[1].stock_id, late.stock_id);
        assert_eq!(ranked[2].stock_id, undated.stock_id);
    }

    #[test]
    fn default_consume_location_outranks_everything() {
        let mut product = product();
        let fridge = LocationId::new();
        product.default_consume_location = Some(fridge);

        let mut opened_elsewhere = batch(product.id, dec!(1));
        opened_elsewhere.open = true;
        let mut in_fridge = batch(product.id, dec!(1));
        in_fridge.location = Some(fridge);

        let batches = vec![opened_elsewhere, in_fridge.clone()];
        let ranked = rank_batches(&product, &batches);
        assert_eq!(ranked[0].stock_id, in_fridge.stock_id);
    }

    #[test]
    fn purchase_date_breaks_best_before_ties() {
        let product = product();
        let bb = NaiveDate::from_ymd_opt(2024, 6, 1);
        let mut newer = batch(product.id, dec!(1));
        newer.best_before = bb;
        newer.purchase_date = NaiveDate::from_ymd_opt(2024, 3, 10);
        let mut older = batch(product.id, dec!(1));
        older.best_before = bb;
        older.purchase_date = NaiveDate::from_ymd_opt(2024, 3, 1);

        let batches = vec![newer, older.clone()];
        let ranked = rank_batches(&product, &batches);
        assert_eq!(ranked[0].stock_id, older.stock_id);
    }
}
