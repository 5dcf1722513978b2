use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use larder_core::{EntryId, StockId};

use crate::entry::{LedgerEntry, TransactionKind};

/// Reconciled view of an edited batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditedEntryRecord {
    pub stock_id: StockId,
    /// The stock-edit-new entry the record is derived from.
    pub entry_id: EntryId,
    /// The amount the batch was originally received with, reconstructed from
    /// the corrected amount plus everything consumed before the correction.
    pub effective_original_amount: Decimal,
}

/// Reconstruct the originally-received amount of an edited batch.
///
/// Takes the newest non-undone stock-edit-new entry for the batch and adds
/// back the removals (consumptions and downward corrections) recorded before
/// that edit. Returns `None` when the batch was never edited.
///
/// Removals after the edit are deliberately ignored: the edit corrected the
/// batch as it stood, so only prior removals separate the corrected amount
/// from the received one.
pub fn effective_original_amount(
    entries: &[LedgerEntry],
    stock_id: StockId,
) -> Option<Decimal> {
    let (edit_pos, edit) = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| {
            e.stock_id == stock_id
                && e.kind == TransactionKind::StockEditNew
                && e.is_effective()
        })
        .next_back()?;

    let removed_before: Decimal = entries[..edit_pos]
        .iter()
        .filter(|e| {
            e.stock_id == stock_id
                && e.is_effective()
                && e.is_removal()
                && matches!(
                    e.kind,
                    TransactionKind::Consume | TransactionKind::InventoryCorrection
                )
        })
        .map(|e| e.amount)
        .sum();

    Some(edit.amount - removed_before)
}

/// One record per edited batch, in batch order.
pub fn edited_entries(entries: &[LedgerEntry]) -> Vec<EditedEntryRecord> {
    let mut stock_ids: Vec<StockId> = entries
        .iter()
        .filter(|e| e.kind == TransactionKind::StockEditNew && e.is_effective())
        .map(|e| e.stock_id)
        .collect();
    stock_ids.sort();
    stock_ids.dedup();

    stock_ids
        .into_iter()
        .filter_map(|stock_id| {
            let edit = entries
                .iter()
                .filter(|e| {
                    e.stock_id == stock_id
                        && e.kind == TransactionKind::StockEditNew
                        && e.is_effective()
                })
                .next_back()?;
            effective_original_amount(entries, stock_id).map(|amount| EditedEntryRecord {
                stock_id,
                entry_id: edit.id,
                effective_original_amount: amount,
            })
        })
        .collect()
}
