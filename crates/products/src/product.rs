use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use larder_core::{DomainError, DomainResult, LocationId, ProductId, TenantId, UnitId};

/// What a batch's due date means for the product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DueType {
    /// Still usable after the date, quality may degrade.
    BestBefore,
    /// Hard expiration; unusable after the date.
    Expiration,
}

/// Product configuration as the stock engine sees it.
///
/// Amounts in the ledger are always expressed in the stocking unit; the
/// purchase/consumption/pricing units only matter at the operation surface,
/// where the conversion graph translates between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub tenant_id: TenantId,
    pub name: String,

    pub stocking_unit: UnitId,
    pub purchase_unit: UnitId,
    pub consumption_unit: UnitId,
    pub pricing_unit: UnitId,

    /// Below this amount the product is reported as missing (0 disables).
    pub min_stock_amount: Decimal,
    /// Evaluate sub-product minimums cumulated into this (parent) product.
    pub cumulate_min_stock_of_sub_products: bool,
    /// Opened batches count as already gone for missing-stock purposes.
    pub treat_opened_as_out_of_stock: bool,
    pub due_type: DueType,

    pub default_consume_location: Option<LocationId>,
    /// Self-referential, at most two levels deep (enforced by the catalog).
    pub parent_product_id: Option<ProductId>,
    pub active: bool,
}

impl Product {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ProductId,
        tenant_id: TenantId,
        name: impl Into<String>,
        stocking_unit: UnitId,
        purchase_unit: UnitId,
        consumption_unit: UnitId,
        pricing_unit: UnitId,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        Ok(Self {
            id,
            tenant_id,
            name,
            stocking_unit,
            purchase_unit,
            consumption_unit,
            pricing_unit,
            min_stock_amount: Decimal::ZERO,
            cumulate_min_stock_of_sub_products: false,
            treat_opened_as_out_of_stock: false,
            due_type: DueType::BestBefore,
            default_consume_location: None,
            parent_product_id: None,
            active: true,
        })
    }

    /// Convenience constructor for products stocked, bought, consumed and
    /// priced in one and the same unit.
    pub fn with_single_unit(
        id: ProductId,
        tenant_id: TenantId,
        name: impl Into<String>,
        unit: UnitId,
    ) -> DomainResult<Self> {
        Self::new(id, tenant_id, name, unit, unit, unit, unit)
    }

    pub fn min_stock(mut self, amount: Decimal) -> DomainResult<Self> {
        if amount < Decimal::ZERO {
            return Err(DomainError::validation("minimum stock cannot be negative"));
        }
        self.min_stock_amount = amount;
        Ok(self)
    }

    pub fn child_of(mut self, parent: ProductId) -> Self {
        self.parent_product_id = Some(parent);
        self
    }

    pub fn cumulating_sub_stock(mut self) -> Self {
        self.cumulate_min_stock_of_sub_products = true;
        self
    }
}
