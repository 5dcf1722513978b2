//! `larder-planner` — read-side planning over derived stock state.
//!
//! Pure functions: batch consumption ranking (FIFO/FEFO with location and
//! open-status preference), missing-stock evaluation over the product
//! hierarchy, and parent/sub-product substitution. The planner never mutates
//! the ledger; the engine feeds its ranking back into consume commands.

pub mod missing;
pub mod rank;
pub mod substitute;

pub use missing::{MissingStock, StockTotals, evaluate_missing};
pub use rank::rank_batches;
pub use substitute::effective_substitute;
