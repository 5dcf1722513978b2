//! `larder-units` — quantity-unit conversion resolution.
//!
//! Resolves a conversion factor between any two units for a given product by
//! combining product-specific rules with tenant-wide defaults.

pub mod graph;
pub mod rule;

pub use graph::ConversionGraph;
pub use rule::ConversionRule;
