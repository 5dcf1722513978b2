use std::collections::BTreeMap;

use larder_core::{DomainError, DomainResult, ProductId};

use crate::product::Product;

/// Per-tenant product registry with a strictly two-level hierarchy.
///
/// A sub-product's parent must not itself have a parent, so hierarchy
/// resolution is a single lookup, never a recursive traversal.
#[derive(Debug, Clone, Default)]
pub struct ProductCatalog {
    products: BTreeMap<ProductId, Product>,
}

impl ProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a product, enforcing hierarchy invariants.
    pub fn insert(&mut self, product: Product) -> DomainResult<()> {
        if let Some(parent_id) = product.parent_product_id {
            if parent_id == product.id {
                return Err(DomainError::invariant("product cannot be its own parent"));
            }
            let parent = self
                .products
                .get(&parent_id)
                .ok_or(DomainError::NotFound)?;
            if parent.parent_product_id.is_some() {
                return Err(DomainError::invariant(
                    "parent product must not itself have a parent",
                ));
            }
            if !self.children(product.id).is_empty() {
                return Err(DomainError::invariant(
                    "a product with sub-products cannot be assigned a parent",
                ));
            }
        }
        self.products.insert(product.id, product);
        Ok(())
    }

    pub fn get(&self, id: ProductId) -> Option<&Product> {
        self.products.get(&id)
    }

    pub fn require(&self, id: ProductId) -> DomainResult<&Product> {
        self.products.get(&id).ok_or(DomainError::NotFound)
    }

    /// Direct sub-products of `parent`, in stable id order.
    pub fn children(&self, parent: ProductId) -> Vec<&Product> {
        self.products
            .values()
            .filter(|p| p.parent_product_id == Some(parent))
            .collect()
    }

    pub fn parent(&self, id: ProductId) -> Option<&Product> {
        self.products
            .get(&id)
            .and_then(|p| p.parent_product_id)
            .and_then(|parent_id| self.products.get(&parent_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::{TenantId, UnitId};

    fn product(tenant: TenantId, name: &str) -> Product {
        Product::with_single_unit(ProductId::new(), tenant, name, UnitId::new()).unwrap()
    }

    #[test]
    fn children_resolve_with_single_lookup() {
        let tenant = TenantId::new();
        let mut catalog = ProductCatalog::new();
        let parent = product(tenant, "Milk");
        let parent_id = parent.id;
        catalog.insert(parent).unwrap();

        let child = product(tenant, "Milk 2%").child_of(parent_id);
        let child_id = child.id;
        catalog.insert(child).unwrap();

        let children = catalog.children(parent_id);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child_id);
        assert_eq!(catalog.parent(child_id).unwrap().id, parent_id);
    }

    #[test]
    fn grandchildren_are_rejected() {
        let tenant = TenantId::new();
        let mut catalog = ProductCatalog::new();
        let parent = product(tenant, "Milk");
        let parent_id = parent.id;
        catalog.insert(parent).unwrap();

        let child = product(tenant, "Milk 2%").child_of(parent_id);
        let child_id = child.id;
        catalog.insert(child).unwrap();

        let grandchild = product(tenant, "Milk 2% Organic").child_of(child_id);
        let err = catalog.insert(grandchild).unwrap_err();
        match err {
            DomainError::InvariantViolation(_) => {}
            other => panic!("expected InvariantViolation, got {other:?}"),
        }
    }

    #[test]
    fn parent_with_children_cannot_become_a_child() {
        let tenant = TenantId::new();
        let mut catalog = ProductCatalog::new();
        let root = product(tenant, "Dairy");
        let root_id = root.id;
        catalog.insert(root).unwrap();

        let mid = product(tenant, "Milk");
        let mid_id = mid.id;
        catalog.insert(mid.clone()).unwrap();
        catalog
            .insert(product(tenant, "Milk 2%").child_of(mid_id))
            .unwrap();

        let err = catalog.insert(mid.child_of(root_id)).unwrap_err();
        match err {
            DomainError::InvariantViolation(_) => {}
            other => panic!("expected InvariantViolation, got {other:?}"),
        }
    }

    #[test]
    fn missing_parent_is_not_found() {
        let tenant = TenantId::new();
        let mut catalog = ProductCatalog::new();
        let orphan = product(tenant, "Milk 2%").child_of(ProductId::new());
        let err = catalog.insert(orphan).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }
}
