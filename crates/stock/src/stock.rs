use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use larder_core::{
    Aggregate, AggregateRoot, DomainError, EntryId, LocationId, ProductId, StockId, TenantId,
    UserId,
};
use larder_events::Event;

use crate::batch::StockBatch;
use crate::entry::{LedgerEntry, TransactionKind};

/// Aggregate root: the stock of one product (per tenant).
///
/// State is the ordered ledger entry stream plus the batch map derived from
/// it. `handle` decides events without mutating; `apply` evolves entries and
/// batches deterministically, so replaying the event stream always
/// reconstructs the same state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductStock {
    product_id: ProductId,
    tenant_id: Option<TenantId>,
    entries: Vec<LedgerEntry>,
    batches: BTreeMap<StockId, StockBatch>,
    version: u64,
}

impl ProductStock {
    /// Create an empty aggregate instance for rehydration.
    pub fn empty(product_id: ProductId) -> Self {
        Self {
            product_id,
            tenant_id: None,
            entries: Vec::new(),
            batches: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    /// Full ledger for this product, in append order.
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn entry(&self, id: EntryId) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn batch(&self, stock_id: StockId) -> Option<&StockBatch> {
        self.batches.get(&stock_id)
    }

    /// All batches, including fully consumed zero-amount rows.
    pub fn batches(&self) -> impl Iterator<Item = &StockBatch> {
        self.batches.values()
    }

    /// Batches with a positive remaining amount.
    pub fn open_batches(&self) -> Vec<&StockBatch> {
        self.batches.values().filter(|b| b.in_stock()).collect()
    }

    /// Total amount in stock, in stocking units.
    pub fn total_amount(&self) -> Decimal {
        self.batches.values().map(|b| b.amount).sum()
    }

    /// Total amount sitting in opened batches.
    pub fn total_opened_amount(&self) -> Decimal {
        self.batches.values().map(|b| b.opened_amount()).sum()
    }

    /// Ledger/batch consistency: for every batch, the sum of its non-undone
    /// entry amounts equals the batch amount. Used by tests and debug checks.
    pub fn batch_sums_consistent(&self) -> bool {
        self.batches.iter().all(|(stock_id, batch)| {
            let sum: Decimal = self
                .entries
                .iter()
                .filter(|e| e.stock_id == *stock_id && e.is_effective())
                .map(|e| e.amount)
                .sum();
            sum == batch.amount && batch.amount >= Decimal::ZERO
        })
    }
}

/// Command: RecordPurchase (also covers self-production via `self_production`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPurchase {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub stock_id: StockId,
    /// Amount in stocking units (already converted by the caller).
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub best_before: Option<NaiveDate>,
    pub purchase_date: NaiveDate,
    pub location: Option<LocationId>,
    pub self_production: bool,
    pub transaction_id: Uuid,
    pub user_id: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Consume across a ranked batch preference list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consume {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    /// Amount in stocking units (already converted by the caller).
    pub amount: Decimal,
    /// Eligible batches in consumption order (planner ranking). Draws span
    /// batches when the first alone is insufficient.
    pub preference: Vec<StockId>,
    pub used_date: Option<NaiveDate>,
    pub note: Option<String>,
    pub transaction_id: Uuid,
    pub user_id: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CorrectInventory (set a batch to a counted amount).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectInventory {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub stock_id: StockId,
    pub new_amount: Decimal,
    pub transaction_id: Uuid,
    pub user_id: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: EditEntry (manual correction of a batch's recorded amount).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditEntry {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub stock_id: StockId,
    pub new_amount: Decimal,
    pub transaction_id: Uuid,
    pub user_id: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Undo a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Undo {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub entry_id: EntryId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkOpened (flip a batch to opened).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkOpened {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub stock_id: StockId,
    /// Snapshot the pre-open amount for partial-use accounting.
    pub track_amount_before_open: bool,
    pub transaction_id: Uuid,
    pub user_id: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    RecordPurchase(RecordPurchase),
    Consume(Consume),
    CorrectInventory(CorrectInventory),
    EditEntry(EditEntry),
    Undo(Undo),
    MarkOpened(MarkOpened),
}

/// Events of the stock ledger.
///
/// `EntryAppended`/`BatchOpened` carry the full immutable ledger entry;
/// `EntryUndone` only flips the entry's undone flag and reverses its batch
/// effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    EntryAppended {
        entry: LedgerEntry,
    },
    BatchOpened {
        entry: LedgerEntry,
        track_amount_before_open: bool,
    },
    EntryUndone {
        tenant_id: TenantId,
        product_id: ProductId,
        entry_id: EntryId,
        undone_at: DateTime<Utc>,
    },
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::EntryAppended { .. } => "stock.entry_appended",
            StockEvent::BatchOpened { .. } => "stock.batch_opened",
            StockEvent::EntryUndone { .. } => "stock.entry_undone",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::EntryAppended { entry } => entry.occurred_at,
            StockEvent::BatchOpened { entry, .. } => entry.occurred_at,
            StockEvent::EntryUndone { undone_at, .. } => *undone_at,
        }
    }
}

impl AggregateRoot for ProductStock {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.product_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for ProductStock {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::EntryAppended { entry } => {
                self.apply_entry(entry);
                self.entries.push(entry.clone());
            }
            StockEvent::BatchOpened {
                entry,
                track_amount_before_open,
            } => {
                if let Some(batch) = self.batches.get_mut(&entry.stock_id) {
                    batch.open = true;
                    batch.opened_at = Some(entry.occurred_at);
                    batch.amount_before_open =
                        track_amount_before_open.then_some(batch.amount);
                }
                if self.tenant_id.is_none() {
                    self.tenant_id = Some(entry.tenant_id);
                }
                self.entries.push(entry.clone());
            }
            StockEvent::EntryUndone {
                entry_id,
                undone_at,
                ..
            } => {
                self.apply_undo(*entry_id, *undone_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::RecordPurchase(cmd) => self.handle_purchase(cmd),
            StockCommand::Consume(cmd) => self.handle_consume(cmd),
            StockCommand::CorrectInventory(cmd) => self.handle_correct(cmd),
            StockCommand::EditEntry(cmd) => self.handle_edit(cmd),
            StockCommand::Undo(cmd) => self.handle_undo(cmd),
            StockCommand::MarkOpened(cmd) => self.handle_mark_opened(cmd),
        }
    }
}

impl ProductStock {
    fn apply_entry(&mut self, entry: &LedgerEntry) {
        if self.tenant_id.is_none() {
            self.tenant_id = Some(entry.tenant_id);
        }

        match entry.kind {
            TransactionKind::Purchase | TransactionKind::SelfProduction => {
                self.batches.insert(
                    entry.stock_id,
                    StockBatch {
                        stock_id: entry.stock_id,
                        product_id: entry.product_id,
                        amount: entry.amount,
                        best_before: entry.best_before,
                        purchase_date: entry.purchase_date,
                        price: entry.price,
                        location: entry.location,
                        open: false,
                        opened_at: None,
                        amount_before_open: None,
                    },
                );
            }
            TransactionKind::Consume
            | TransactionKind::InventoryCorrection
            | TransactionKind::StockEditOld
            | TransactionKind::StockEditNew => {
                if let Some(batch) = self.batches.get_mut(&entry.stock_id) {
                    batch.amount += entry.amount;
                }
            }
            TransactionKind::ProductOpened => {
                // Zero-amount marker; batch state is handled by BatchOpened.
            }
        }
    }

    fn apply_undo(&mut self, entry_id: EntryId, undone_at: DateTime<Utc>) {
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == entry_id) else {
            return;
        };
        entry.undone = true;
        entry.undone_at = Some(undone_at);
        let amount = entry.amount;
        let stock_id = entry.stock_id;
        let kind = entry.kind;

        if let Some(batch) = self.batches.get_mut(&stock_id) {
            batch.amount -= amount;
            if kind == TransactionKind::ProductOpened {
                batch.open = false;
                batch.opened_at = None;
                batch.amount_before_open = None;
            }
        }
    }

    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        match self.tenant_id {
            None => Ok(()),
            Some(own) if own == tenant_id => Ok(()),
            Some(_) => Err(DomainError::invariant("tenant mismatch")),
        }
    }

    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.product_id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn require_batch(&self, stock_id: StockId) -> Result<&StockBatch, DomainError> {
        self.batches.get(&stock_id).ok_or(DomainError::NotFound)
    }

    fn handle_purchase(&self, cmd: &RecordPurchase) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if cmd.amount <= Decimal::ZERO {
            return Err(DomainError::validation("amount must be positive"));
        }
        if let Some(price) = cmd.price {
            if price < Decimal::ZERO {
                return Err(DomainError::validation("price cannot be negative"));
            }
        }
        if self.batches.contains_key(&cmd.stock_id) {
            return Err(DomainError::conflict("batch already exists"));
        }

        let kind = if cmd.self_production {
            TransactionKind::SelfProduction
        } else {
            TransactionKind::Purchase
        };

        Ok(vec![StockEvent::EntryAppended {
            entry: LedgerEntry {
                id: EntryId::new(),
                tenant_id: cmd.tenant_id,
                product_id: cmd.product_id,
                stock_id: cmd.stock_id,
                kind,
                amount: cmd.amount,
                best_before: cmd.best_before,
                purchase_date: Some(cmd.purchase_date),
                used_date: None,
                price: cmd.price,
                location: cmd.location,
                transaction_id: cmd.transaction_id,
                user_id: cmd.user_id,
                note: None,
                undone: false,
                undone_at: None,
                occurred_at: cmd.occurred_at,
            },
        }])
    }

    fn handle_consume(&self, cmd: &Consume) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if cmd.amount <= Decimal::ZERO {
            return Err(DomainError::validation("amount must be positive"));
        }

        // A batch listed twice would be counted (and drawn from) twice.
        let mut preference: Vec<StockId> = Vec::with_capacity(cmd.preference.len());
        for stock_id in &cmd.preference {
            if !preference.contains(stock_id) {
                preference.push(*stock_id);
            }
        }

        let mut available = Decimal::ZERO;
        for stock_id in &preference {
            available += self.require_batch(*stock_id)?.amount;
        }
        if cmd.amount > available {
            // Surfaced to the caller, never silently clipped.
            return Err(DomainError::InsufficientStock {
                requested: cmd.amount,
                available,
            });
        }

        // One consume entry per affected batch, all under one transaction id.
        let mut events = Vec::new();
        let mut remaining = cmd.amount;
        for stock_id in &preference {
            if remaining <= Decimal::ZERO {
                break;
            }
            let batch = self.require_batch(*stock_id)?;
            if !batch.in_stock() {
                continue;
            }
            let draw = batch.amount.min(remaining);
            remaining -= draw;
            events.push(StockEvent::EntryAppended {
                entry: LedgerEntry {
                    id: EntryId::new(),
                    tenant_id: cmd.tenant_id,
                    product_id: cmd.product_id,
                    stock_id: *stock_id,
                    kind: TransactionKind::Consume,
                    amount: -draw,
                    best_before: batch.best_before,
                    purchase_date: batch.purchase_date,
                    used_date: cmd.used_date,
                    price: batch.price,
                    location: batch.location,
                    transaction_id: cmd.transaction_id,
                    user_id: cmd.user_id,
                    note: cmd.note.clone(),
                    undone: false,
                    undone_at: None,
                    occurred_at: cmd.occurred_at,
                },
            });
        }

        Ok(events)
    }

    fn handle_correct(&self, cmd: &CorrectInventory) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if cmd.new_amount < Decimal::ZERO {
            return Err(DomainError::validation("counted amount cannot be negative"));
        }
        let batch = self.require_batch(cmd.stock_id)?;
        let delta = cmd.new_amount - batch.amount;
        if delta == Decimal::ZERO {
            return Err(DomainError::validation(
                "batch is already at the requested amount",
            ));
        }

        Ok(vec![StockEvent::EntryAppended {
            entry: LedgerEntry {
                id: EntryId::new(),
                tenant_id: cmd.tenant_id,
                product_id: cmd.product_id,
                stock_id: cmd.stock_id,
                kind: TransactionKind::InventoryCorrection,
                amount: delta,
                best_before: batch.best_before,
                purchase_date: batch.purchase_date,
                used_date: None,
                price: batch.price,
                location: batch.location,
                transaction_id: cmd.transaction_id,
                user_id: cmd.user_id,
                note: None,
                undone: false,
                undone_at: None,
                occurred_at: cmd.occurred_at,
            },
        }])
    }

    /// Corrections to history are modeled as a paired old/new entry, never as
    /// a rewrite: the old entry removes the prior batch amount, the new entry
    /// records the corrected amount, so per-batch sums stay exact.
    fn handle_edit(&self, cmd: &EditEntry) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if cmd.new_amount < Decimal::ZERO {
            return Err(DomainError::validation("edited amount cannot be negative"));
        }
        let batch = self.require_batch(cmd.stock_id)?;

        let base = LedgerEntry {
            id: EntryId::new(),
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            stock_id: cmd.stock_id,
            kind: TransactionKind::StockEditOld,
            amount: -batch.amount,
            best_before: batch.best_before,
            purchase_date: batch.purchase_date,
            used_date: None,
            price: batch.price,
            location: batch.location,
            transaction_id: cmd.transaction_id,
            user_id: cmd.user_id,
            note: None,
            undone: false,
            undone_at: None,
            occurred_at: cmd.occurred_at,
        };
        let new_entry = LedgerEntry {
            id: EntryId::new(),
            kind: TransactionKind::StockEditNew,
            amount: cmd.new_amount,
            ..base.clone()
        };

        Ok(vec![
            StockEvent::EntryAppended { entry: base },
            StockEvent::EntryAppended { entry: new_entry },
        ])
    }

    fn handle_undo(&self, cmd: &Undo) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;

        let entry = self.entry(cmd.entry_id).ok_or(DomainError::NotFound)?;
        if entry.undone {
            return Err(DomainError::AlreadyUndone(entry.id));
        }

        match entry.kind {
            TransactionKind::StockEditOld => {
                // Only the pair as a whole may be undone, via its -new half.
                return Err(DomainError::cannot_undo(
                    "stock-edit-old entries can only be undone through their stock-edit-new pair",
                ));
            }
            TransactionKind::StockEditNew => {
                let old = self
                    .entries
                    .iter()
                    .find(|e| {
                        e.transaction_id == entry.transaction_id
                            && e.kind == TransactionKind::StockEditOld
                            && !e.undone
                    })
                    .ok_or_else(|| {
                        DomainError::cannot_undo("stock-edit pair is incomplete")
                    })?;

                let batch = self.require_batch(entry.stock_id)?;
                if batch.amount - entry.amount - old.amount < Decimal::ZERO {
                    return Err(DomainError::cannot_undo(
                        "reversal would drive stock negative",
                    ));
                }

                // Undo the old half first so the batch never dips negative
                // while the pair unwinds.
                return Ok(vec![
                    StockEvent::EntryUndone {
                        tenant_id: cmd.tenant_id,
                        product_id: cmd.product_id,
                        entry_id: old.id,
                        undone_at: cmd.occurred_at,
                    },
                    StockEvent::EntryUndone {
                        tenant_id: cmd.tenant_id,
                        product_id: cmd.product_id,
                        entry_id: entry.id,
                        undone_at: cmd.occurred_at,
                    },
                ]);
            }
            _ => {}
        }

        let batch = self.require_batch(entry.stock_id)?;
        if batch.amount - entry.amount < Decimal::ZERO {
            return Err(DomainError::cannot_undo(
                "reversal would drive stock negative",
            ));
        }

        Ok(vec![StockEvent::EntryUndone {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            entry_id: entry.id,
            undone_at: cmd.occurred_at,
        }])
    }

    fn handle_mark_opened(&self, cmd: &MarkOpened) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;

        let batch = self.require_batch(cmd.stock_id)?;
        if batch.open {
            return Err(DomainError::conflict("batch is already opened"));
        }
        if !batch.in_stock() {
            return Err(DomainError::validation("cannot open an empty batch"));
        }

        Ok(vec![StockEvent::BatchOpened {
            entry: LedgerEntry {
                id: EntryId::new(),
                tenant_id: cmd.tenant_id,
                product_id: cmd.product_id,
                stock_id: cmd.stock_id,
                kind: TransactionKind::ProductOpened,
                amount: Decimal::ZERO,
                best_before: batch.best_before,
                purchase_date: batch.purchase_date,
                used_date: None,
                price: batch.price,
                location: batch.location,
                transaction_id: cmd.transaction_id,
                user_id: cmd.user_id,
                note: None,
                undone: false,
                undone_at: None,
                occurred_at: cmd.occurred_at,
            },
            track_amount_before_open: cmd.track_amount_before_open,
        }])
    }
}
