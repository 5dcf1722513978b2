//! `larder-products` — product configuration and hierarchy.
//!
//! Products here are configuration data read by the stock engine (units,
//! minimum stock, parent link); product CRUD itself lives outside the core.

pub mod catalog;
pub mod product;

pub use catalog::ProductCatalog;
pub use product::{DueType, Product};
