use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use larder_core::{ProductId, UnitId};

/// One directed conversion edge: `amount_in_to_unit = amount_in_from_unit * factor`.
///
/// Rules scoped to a product override/extend the tenant-wide defaults
/// (`product_id: None`). Edges are directed; an inverse conversion needs its
/// own rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRule {
    pub product_id: Option<ProductId>,
    pub from_unit: UnitId,
    pub to_unit: UnitId,
    /// Strictly positive rational multiplier.
    pub factor: Decimal,
}

impl ConversionRule {
    /// Tenant-wide default rule.
    pub fn default_rule(from_unit: UnitId, to_unit: UnitId, factor: Decimal) -> Self {
        Self {
            product_id: None,
            from_unit,
            to_unit,
            factor,
        }
    }

    /// Rule scoped to a single product.
    pub fn product_rule(
        product_id: ProductId,
        from_unit: UnitId,
        to_unit: UnitId,
        factor: Decimal,
    ) -> Self {
        Self {
            product_id: Some(product_id),
            from_unit,
            to_unit,
            factor,
        }
    }
}
