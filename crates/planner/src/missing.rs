use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use larder_core::ProductId;
use larder_products::{Product, ProductCatalog};
use larder_units::ConversionGraph;

/// Per-product stock totals, in the product's stocking unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTotals {
    pub amount: Decimal,
    pub amount_opened: Decimal,
}

/// A product below its minimum stock level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingStock {
    pub product_id: ProductId,
    /// Shortfall in the product's stocking unit. Always positive.
    pub amount_missing: Decimal,
    pub is_partly_in_stock: bool,
}

/// Evaluate minimum-stock shortfalls across the catalog.
///
/// Each active product contributes at most one result, through exactly one of
/// three rules:
/// - a parent that cumulates sub-product minimums is evaluated against the sum
///   of its active children's minimums, with children amounts converted into
///   the parent's stocking unit (advisory conversion, factor 1 fallback);
/// - children of such a parent are rolled up there and never reported on
///   their own;
/// - every other product with a minimum is evaluated against its own amount,
///   with opened stock counting as gone when the product is configured so.
///
/// Shortfalls of zero or less are omitted.
pub fn evaluate_missing(
    catalog: &ProductCatalog,
    totals: &BTreeMap<ProductId, StockTotals>,
    graph: &ConversionGraph,
) -> Vec<MissingStock> {
    let mut missing = Vec::new();

    for product in catalog.iter().filter(|p| p.active) {
        if rolled_up_into_parent(catalog, product) {
            continue;
        }

        let result = if product.cumulate_min_stock_of_sub_products {
            cumulated_shortfall(catalog, totals, graph, product)
        } else {
            own_shortfall(totals, product)
        };

        if let Some(result) = result {
            missing.push(result);
        }
    }

    missing
}

fn rolled_up_into_parent(catalog: &ProductCatalog, product: &Product) -> bool {
    catalog
        .parent(product.id)
        .is_some_and(|parent| parent.active && parent.cumulate_min_stock_of_sub_products)
}

fn own_shortfall(
    totals: &BTreeMap<ProductId, StockTotals>,
    product: &Product,
) -> Option<MissingStock> {
    if product.min_stock_amount <= Decimal::ZERO {
        return None;
    }

    let stock = totals.get(&product.id).copied().unwrap_or_default();
    let mut effective = stock.amount;
    if product.treat_opened_as_out_of_stock {
        effective -= stock.amount_opened;
    }

    let amount_missing = product.min_stock_amount - effective;
    (amount_missing > Decimal::ZERO).then_some(MissingStock {
        product_id: product.id,
        amount_missing,
        is_partly_in_stock: effective > Decimal::ZERO,
    })
}

fn cumulated_shortfall(
    catalog: &ProductCatalog,
    totals: &BTreeMap<ProductId, StockTotals>,
    graph: &ConversionGraph,
    parent: &Product,
) -> Option<MissingStock> {
    let children: Vec<&Product> = catalog
        .children(parent.id)
        .into_iter()
        .filter(|c| c.active)
        .collect();
    if children.is_empty() {
        return own_shortfall(totals, parent);
    }

    let required: Decimal = children.iter().map(|c| c.min_stock_amount).sum();
    if required <= Decimal::ZERO {
        return None;
    }

    let mut aggregated = totals
        .get(&parent.id)
        .copied()
        .unwrap_or_default()
        .amount;
    for child in &children {
        let amount = totals.get(&child.id).copied().unwrap_or_default().amount;
        let factor = graph.resolve_or_one(
            child.id,
            child.stocking_unit,
            child.stocking_unit,
            parent.stocking_unit,
        );
        aggregated += amount * factor;
    }

    let amount_missing = required - aggregated;
    (amount_missing > Decimal::ZERO).then_some(MissingStock {
        product_id: parent.id,
        amount_missing,
        is_partly_in_stock: aggregated > Decimal::ZERO,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::{TenantId, UnitId};
    use rust_decimal_macros::dec;

    fn graph() -> ConversionGraph {
        ConversionGraph::build(Vec::new()).unwrap()
    }

    fn single_unit(tenant: TenantId, name: &str, min: Decimal) -> Product {
        Product::with_single_unit(ProductId::new(), tenant, name, UnitId::new())
            .unwrap()
            .min_stock(min)
            .unwrap()
    }

    fn totals_of(entries: &[(ProductId, Decimal, Decimal)]) -> BTreeMap<ProductId, StockTotals> {
        entries
            .iter()
            .map(|(id, amount, opened)| {
                (
                    *id,
                    StockTotals {
                        amount: *amount,
                        amount_opened: *opened,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn product_below_minimum_is_reported() {
        let tenant = TenantId::new();
        let mut catalog = ProductCatalog::new();
        let product = single_unit(tenant, "Eggs", dec!(6));
        let id = product.id;
        catalog.insert(product).unwrap();

        let missing = evaluate_missing(&catalog, &totals_of(&[(id, dec!(2), dec!(0))]), &graph());
        assert_eq!(
            missing,
            vec![MissingStock {
                product_id: id,
                amount_missing: dec!(4),
                is_partly_in_stock: true,
            }]
        );
    }

    #[test]
    fn product_at_or_above_minimum_is_not_reported() {
        let tenant = TenantId::new();
        let mut catalog = ProductCatalog::new();
        let product = single_unit(tenant, "Eggs", dec!(6));
        let id = product.id;
        catalog.insert(product).unwrap();

        let missing = evaluate_missing(&catalog, &totals_of(&[(id, dec!(6), dec!(0))]), &graph());
        assert!(missing.is_empty());
    }

    #[test]
    fn opened_stock_counts_as_gone_when_configured() {
        let tenant = TenantId::new();
        let mut catalog = ProductCatalog::new();
        let mut product = single_unit(tenant, "Juice", dec!(2));
        product.treat_opened_as_out_of_stock = true;
        let id = product.id;
        catalog.insert(product).unwrap();

        // 2 in stock but 1 of them opened, so effectively 1 remains.
        let missing = evaluate_missing(&catalog, &totals_of(&[(id, dec!(2), dec!(1))]), &graph());
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].amount_missing, dec!(1));
        assert!(missing[0].is_partly_in_stock);
    }

    #[test]
    fn nothing_in_stock_is_not_partly_in_stock() {
        let tenant = TenantId::new();
        let mut catalog = ProductCatalog::new();
        let product = single_unit(tenant, "Eggs", dec!(6));
        let id = product.id;
        catalog.insert(product).unwrap();

        let missing = evaluate_missing(&catalog, &BTreeMap::new(), &graph());
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].product_id, id);
        assert_eq!(missing[0].amount_missing, dec!(6));
        assert!(!missing[0].is_partly_in_stock);
    }

    #[test]
    fn cumulating_parent_rolls_up_the_milk_family() {
        // Children need 2 + 1; only 1 is in stock across the family.
        let tenant = TenantId::new();
        let mut catalog = ProductCatalog::new();
        let mut parent = single_unit(tenant, "Milk", dec!(0));
        parent.cumulate_min_stock_of_sub_products = true;
        let parent_id = parent.id;
        let unit = parent.stocking_unit;
        catalog.insert(parent).unwrap();

        let whole = Product::with_single_unit(ProductId::new(), tenant, "Whole milk", unit)
            .unwrap()
            .min_stock(dec!(2))
            .unwrap()
            .child_of(parent_id);
        let whole_id = whole.id;
        catalog.insert(whole).unwrap();

        let skim = Product::with_single_unit(ProductId::new(), tenant, "Skim milk", unit)
            .unwrap()
            .min_stock(dec!(1))
            .unwrap()
            .child_of(parent_id);
        catalog.insert(skim).unwrap();

        let missing = evaluate_missing(
            &catalog,
            &totals_of(&[(whole_id, dec!(1), dec!(0))]),
            &graph(),
        );

        // One row for the parent, none for the children.
        assert_eq!(
            missing,
            vec![MissingStock {
                product_id: parent_id,
                amount_missing: dec!(2),
                is_partly_in_stock: true,
            }]
        );
    }

    #[test]
    fn children_of_non_cumulating_parent_are_reported_on_their_own() {
        let tenant = TenantId::new();
        let mut catalog = ProductCatalog::new();
        let parent = single_unit(tenant, "Milk", dec!(0));
        let parent_id = parent.id;
        let unit = parent.stocking_unit;
        catalog.insert(parent).unwrap();

        let child = Product::with_single_unit(ProductId::new(), tenant, "Whole milk", unit)
            .unwrap()
            .min_stock(dec!(2))
            .unwrap()
            .child_of(parent_id);
        let child_id = child.id;
        catalog.insert(child).unwrap();

        let missing = evaluate_missing(&catalog, &BTreeMap::new(), &graph());
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].product_id, child_id);
    }

    #[test]
    fn child_amounts_convert_into_the_parent_stocking_unit() {
        let tenant = TenantId::new();
        let liter = UnitId::new();
        let milliliter = UnitId::new();

        let mut catalog = ProductCatalog::new();
        let mut parent =
            Product::with_single_unit(ProductId::new(), tenant, "Milk", liter).unwrap();
        parent.cumulate_min_stock_of_sub_products = true;
        let parent_id = parent.id;
        catalog.insert(parent).unwrap();

        let child = Product::with_single_unit(ProductId::new(), tenant, "Milk carton", milliliter)
            .unwrap()
            .min_stock(dec!(2))
            .unwrap()
            .child_of(parent_id);
        let child_id = child.id;
        catalog.insert(child).unwrap();

        let graph = ConversionGraph::build(vec![larder_units::ConversionRule::default_rule(
            milliliter,
            liter,
            dec!(0.001),
        )])
        .unwrap();

        let missing = evaluate_missing(
            &catalog,
            &totals_of(&[(child_id, dec!(500), dec!(0))]),
            &graph,
        );

        // 500 ml converts to 0.5 l against a required 2.
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].product_id, parent_id);
        assert_eq!(missing[0].amount_missing, dec!(1.5));
    }

    #[test]
    fn inactive_products_are_skipped() {
        let tenant = TenantId::new();
        let mut catalog = ProductCatalog::new();
        let mut product = single_unit(tenant, "Eggs", dec!(6));
        product.active = false;
        catalog.insert(product).unwrap();

        assert!(evaluate_missing(&catalog, &BTreeMap::new(), &graph()).is_empty());
    }
}
