//! `larder-pricing` — price aggregation over the stock ledger.
//!
//! All aggregations are derived reads; nothing here writes to the ledger.
//! Edited batches are priced through their newest correction entry with the
//! reconciled original amount, so a corrected receipt contributes its true
//! quantity to the weighted average.

pub mod price;

pub use price::{PricePoint, average_price, current_price, eligible_entries, price_history};
