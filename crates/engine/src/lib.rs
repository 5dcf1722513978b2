//! `larder-engine` — the operation surface of the stock core.
//!
//! [`StockEngine`] ties the pieces together: product catalogs and conversion
//! graphs per tenant, one event-sourced ledger stream per (tenant, product)
//! behind a mutex, planner-driven batch selection for consumption, price
//! aggregation, idempotent mutation receipts, and publication of committed
//! events on an in-memory bus.

pub mod engine;
pub mod receipt;

pub use engine::{ConsumeRequest, PurchaseRequest, StockEngine, StockOverview};
pub use receipt::{BatchChange, MovementReceipt};
