//! `larder-stock` — the append-only stock ledger and its derived batch state.
//!
//! The source of truth is the ledger: every stock-affecting movement is an
//! immutable entry, corrections are modeled as paired edit entries, and
//! reversals as an `undone` flag. Batches are derived by replay and stay
//! consistent with the per-batch entry sums at all times.

pub mod batch;
pub mod entry;
pub mod reconcile;
pub mod stock;

pub use batch::StockBatch;
pub use entry::{LedgerEntry, TransactionKind};
pub use reconcile::{EditedEntryRecord, edited_entries, effective_original_amount};
pub use stock::{
    Consume, CorrectInventory, EditEntry, MarkOpened, ProductStock, RecordPurchase, StockCommand,
    StockEvent, Undo,
};
