use std::collections::BTreeMap;

use larder_core::{DomainResult, ProductId};
use larder_products::ProductCatalog;
use larder_stock::StockBatch;

use crate::rank::rank_key_for_location;

/// Resolve which product to actually draw from when `parent` is requested.
///
/// The parent wins when it has own stock. Otherwise the direct children's
/// in-stock batches are ranked together (under the parent's preferred
/// location) and the owner of the best batch is chosen. With nothing in stock
/// anywhere, the parent is returned so the caller gets its insufficient-stock
/// error against the product that was asked for. One level only; a child is
/// never substituted by its own children.
pub fn effective_substitute(
    catalog: &ProductCatalog,
    parent: ProductId,
    batches_by_product: &BTreeMap<ProductId, Vec<StockBatch>>,
) -> DomainResult<ProductId> {
    let parent_product = catalog.require(parent)?;

    let has_own_stock = batches_by_product
        .get(&parent)
        .is_some_and(|batches| batches.iter().any(StockBatch::in_stock));
    if has_own_stock {
        return Ok(parent);
    }

    let preferred = parent_product.default_consume_location;
    let best = catalog
        .children(parent)
        .into_iter()
        .filter(|child| child.active)
        .flat_map(|child| {
            batches_by_product
                .get(&child.id)
                .into_iter()
                .flatten()
                .filter(|b| b.in_stock())
        })
        .min_by_key(|batch| rank_key_for_location(batch, preferred));

    Ok(best.map_or(parent, |batch| batch.product_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use larder_core::{StockId, TenantId, UnitId};
    use larder_products::Product;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

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

    fn family() -> (ProductCatalog, ProductId, ProductId, ProductId) {
        let tenant = TenantId::new();
        let unit = UnitId::new();
        let mut catalog = ProductCatalog::new();
        let parent = Product::with_single_unit(ProductId::new(), tenant, "Milk", unit).unwrap();
        let parent_id = parent.id;
        catalog.insert(parent).unwrap();
        let whole = Product::with_single_unit(ProductId::new(), tenant, "Whole milk", unit)
            .unwrap()
            .child_of(parent_id);
        let whole_id = whole.id;
        catalog.insert(whole).unwrap();
        let skim = Product::with_single_unit(ProductId::new(), tenant, "Skim milk", unit)
            .unwrap()
            .child_of(parent_id);
        let skim_id = skim.id;
        catalog.insert(skim).unwrap();
        (catalog, parent_id, whole_id, skim_id)
    }

    #[test]
    fn parent_with_own_stock_is_not_substituted() {
        let (catalog, parent, whole, _) = family();
        let mut by_product = BTreeMap::new();
        by_product.insert(parent, vec![batch(parent, dec!(1))]);
        by_product.insert(whole, vec![batch(whole, dec!(5))]);

        assert_eq!(
            effective_substitute(&catalog, parent, &by_product).unwrap(),
            parent
        );
    }

    #[test]
    fn best_ranked_child_batch_wins() {
        let (catalog, parent, whole, skim) = family();
        let mut whole_batch = batch(whole, dec!(5));
        whole_batch.best_before = NaiveDate::from_ymd_opt(2024, 9, 1);
        let mut skim_batch = batch(skim, dec!(5));
        skim_batch.best_before = NaiveDate::from_ymd_opt(2024, 2, 1);

        let mut by_product = BTreeMap::new();
        by_product.insert(whole, vec![whole_batch]);
        by_product.insert(skim, vec![skim_batch]);

        assert_eq!(
            effective_substitute(&catalog, parent, &by_product).unwrap(),
            skim
        );
    }

    #[test]
    fn empty_family_falls_back_to_the_parent() {
        let (catalog, parent, whole, _) = family();
        let mut by_product = BTreeMap::new();
        by_product.insert(whole, vec![batch(whole, Decimal::ZERO)]);

        assert_eq!(
            effective_substitute(&catalog, parent, &by_product).unwrap(),
            parent
        );
    }

    #[test]
    fn unknown_parent_is_not_found() {
        let (catalog, ..) = family();
        let err = effective_substitute(&catalog, ProductId::new(), &BTreeMap::new()).unwrap_err();
        assert_eq!(err, larder_core::DomainError::NotFound);
    }
}
