use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use larder_core::{
    Aggregate, AggregateRoot, DomainError, DomainResult, EntryId, LocationId, ProductId, StockId,
    TenantId, UnitId, UserId,
};
use larder_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use larder_planner::{MissingStock, StockTotals, evaluate_missing, rank_batches};
use larder_pricing::PricePoint;
use larder_products::{Product, ProductCatalog};
use larder_stock::{
    Consume, CorrectInventory, EditEntry, LedgerEntry, MarkOpened, ProductStock, RecordPurchase,
    StockBatch, StockCommand, StockEvent, Undo,
};
use larder_units::{ConversionGraph, ConversionRule};

use crate::receipt::{BatchChange, MovementReceipt};

const AGGREGATE_TYPE: &str = "product_stock";

/// Acquisition request. Amounts arrive in the product's purchase unit and are
/// converted to stocking units before the ledger sees them (strict: no
/// conversion path rejects the request).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub product_id: ProductId,
    /// Amount in the product's purchase unit.
    pub amount: Decimal,
    /// Price per stocking unit.
    pub price: Option<Decimal>,
    pub best_before: Option<NaiveDate>,
    pub purchase_date: NaiveDate,
    pub location: Option<LocationId>,
    pub user_id: Option<UserId>,
    pub idempotency_key: Option<Uuid>,
}

/// Consumption request. The amount arrives in the product's consumption unit;
/// batch selection is delegated to the planner's ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeRequest {
    pub product_id: ProductId,
    /// Amount in the product's consumption unit.
    pub amount: Decimal,
    pub used_date: Option<NaiveDate>,
    pub note: Option<String>,
    pub user_id: Option<UserId>,
    pub idempotency_key: Option<Uuid>,
}

/// Snapshot of one product's stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockOverview {
    pub product_id: ProductId,
    pub amount: Decimal,
    pub amount_opened: Decimal,
    /// In-stock batches only.
    pub batches: Vec<StockBatch>,
}

/// How a stored receipt is validated against current ledger state before a
/// request with the same idempotency key is treated as a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplayCheck {
    /// All receipt entries must still exist and not be undone.
    EntriesLive,
    /// All receipt entries must exist and be undone (undo requests).
    EntriesUndone,
}

type StreamKey = (TenantId, ProductId);

/// The operation surface of the stock core.
///
/// Owns per-(tenant, product) ledger streams behind per-product mutexes, the
/// tenant catalogs and conversion graphs, an idempotency index, and the event
/// bus committed events are published on. All mutation of one product is
/// serialized on its mutex across decide, append and apply, so readers never
/// observe a half-applied movement.
pub struct StockEngine {
    catalogs: RwLock<HashMap<TenantId, ProductCatalog>>,
    graphs: RwLock<HashMap<TenantId, ConversionGraph>>,
    streams: RwLock<HashMap<StreamKey, Arc<Mutex<ProductStock>>>>,
    receipts: RwLock<HashMap<(TenantId, Uuid), MovementReceipt>>,
    bus: InMemoryEventBus<EventEnvelope<StockEvent>>,
}

impl Default for StockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StockEngine {
    pub fn new() -> Self {
        Self {
            catalogs: RwLock::new(HashMap::new()),
            graphs: RwLock::new(HashMap::new()),
            streams: RwLock::new(HashMap::new()),
            receipts: RwLock::new(HashMap::new()),
            bus: InMemoryEventBus::new(),
        }
    }

    /// Subscribe to committed stock events (tenant-scoped envelopes,
    /// sequence number = aggregate version).
    pub fn subscribe(&self) -> Subscription<EventEnvelope<StockEvent>> {
        self.bus.subscribe()
    }

    // ---- configuration ----------------------------------------------------

    /// Insert or replace a product in its tenant's catalog.
    pub fn register_product(&self, product: Product) -> DomainResult<()> {
        let tenant_id = product.tenant_id;
        debug!(%tenant_id, product_id = %product.id, name = %product.name, "registering product");
        let mut catalogs = write(&self.catalogs)?;
        catalogs.entry(tenant_id).or_default().insert(product)
    }

    /// Replace the tenant's conversion rule set, re-validating the graph.
    pub fn configure_conversions(
        &self,
        tenant_id: TenantId,
        rules: Vec<ConversionRule>,
    ) -> DomainResult<()> {
        let graph = ConversionGraph::build(rules)?;
        write(&self.graphs)?.insert(tenant_id, graph);
        debug!(%tenant_id, "conversion graph configured");
        Ok(())
    }

    // ---- mutations --------------------------------------------------------

    pub fn record_purchase(
        &self,
        tenant_id: TenantId,
        request: PurchaseRequest,
    ) -> DomainResult<MovementReceipt> {
        self.record_acquisition(tenant_id, request, false)
    }

    pub fn record_self_production(
        &self,
        tenant_id: TenantId,
        request: PurchaseRequest,
    ) -> DomainResult<MovementReceipt> {
        self.record_acquisition(tenant_id, request, true)
    }

    fn record_acquisition(
        &self,
        tenant_id: TenantId,
        request: PurchaseRequest,
        self_production: bool,
    ) -> DomainResult<MovementReceipt> {
        let product = self.product(tenant_id, request.product_id)?;
        let amount = self.convert_strict(
            tenant_id,
            &product,
            product.purchase_unit,
            product.stocking_unit,
            request.amount,
        )?;
        info!(
            %tenant_id,
            product_id = %product.id,
            %amount,
            self_production,
            "recording acquisition"
        );

        self.execute(
            tenant_id,
            product.id,
            request.idempotency_key,
            ReplayCheck::EntriesLive,
            |_, transaction_id| {
                Ok(StockCommand::RecordPurchase(RecordPurchase {
                    tenant_id,
                    product_id: product.id,
                    stock_id: StockId::new(),
                    amount,
                    price: request.price,
                    best_before: request.best_before,
                    purchase_date: request.purchase_date,
                    location: request.location,
                    self_production,
                    transaction_id,
                    user_id: request.user_id,
                    occurred_at: Utc::now(),
                }))
            },
        )
    }

    pub fn record_consumption(
        &self,
        tenant_id: TenantId,
        request: ConsumeRequest,
    ) -> DomainResult<MovementReceipt> {
        let product = self.product(tenant_id, request.product_id)?;
        let amount = self.convert_strict(
            tenant_id,
            &product,
            product.consumption_unit,
            product.stocking_unit,
            request.amount,
        )?;
        info!(%tenant_id, product_id = %product.id, %amount, "recording consumption");

        self.execute(
            tenant_id,
            product.id,
            request.idempotency_key,
            ReplayCheck::EntriesLive,
            |stock, transaction_id| {
                let batches: Vec<StockBatch> = stock.batches().cloned().collect();
                let preference = rank_batches(&product, &batches)
                    .into_iter()
                    .map(|b| b.stock_id)
                    .collect();
                Ok(StockCommand::Consume(Consume {
                    tenant_id,
                    product_id: product.id,
                    amount,
                    preference,
                    used_date: request.used_date,
                    note: request.note.clone(),
                    transaction_id,
                    user_id: request.user_id,
                    occurred_at: Utc::now(),
                }))
            },
        )
    }

    pub fn record_inventory_correction(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        stock_id: StockId,
        new_amount: Decimal,
        user_id: Option<UserId>,
        idempotency_key: Option<Uuid>,
    ) -> DomainResult<MovementReceipt> {
        let product = self.product(tenant_id, product_id)?;
        info!(%tenant_id, %product_id, %stock_id, %new_amount, "recording inventory correction");

        self.execute(
            tenant_id,
            product.id,
            idempotency_key,
            ReplayCheck::EntriesLive,
            |_, transaction_id| {
                Ok(StockCommand::CorrectInventory(CorrectInventory {
                    tenant_id,
                    product_id,
                    stock_id,
                    new_amount,
                    transaction_id,
                    user_id,
                    occurred_at: Utc::now(),
                }))
            },
        )
    }

    pub fn edit_entry(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        stock_id: StockId,
        new_amount: Decimal,
        user_id: Option<UserId>,
        idempotency_key: Option<Uuid>,
    ) -> DomainResult<MovementReceipt> {
        let product = self.product(tenant_id, product_id)?;
        info!(%tenant_id, %product_id, %stock_id, %new_amount, "editing batch amount");

        self.execute(
            tenant_id,
            product.id,
            idempotency_key,
            ReplayCheck::EntriesLive,
            |_, transaction_id| {
                Ok(StockCommand::EditEntry(EditEntry {
                    tenant_id,
                    product_id,
                    stock_id,
                    new_amount,
                    transaction_id,
                    user_id,
                    occurred_at: Utc::now(),
                }))
            },
        )
    }

    pub fn undo(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        entry_id: EntryId,
        idempotency_key: Option<Uuid>,
    ) -> DomainResult<MovementReceipt> {
        let product = self.product(tenant_id, product_id)?;
        info!(%tenant_id, %product_id, %entry_id, "undoing ledger entry");

        self.execute(
            tenant_id,
            product.id,
            idempotency_key,
            ReplayCheck::EntriesUndone,
            |_, _| {
                Ok(StockCommand::Undo(Undo {
                    tenant_id,
                    product_id,
                    entry_id,
                    occurred_at: Utc::now(),
                }))
            },
        )
    }

    pub fn mark_opened(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        stock_id: StockId,
        track_amount_before_open: bool,
        user_id: Option<UserId>,
        idempotency_key: Option<Uuid>,
    ) -> DomainResult<MovementReceipt> {
        let product = self.product(tenant_id, product_id)?;
        info!(%tenant_id, %product_id, %stock_id, "marking batch opened");

        self.execute(
            tenant_id,
            product.id,
            idempotency_key,
            ReplayCheck::EntriesLive,
            |_, transaction_id| {
                Ok(StockCommand::MarkOpened(MarkOpened {
                    tenant_id,
                    product_id,
                    stock_id,
                    track_amount_before_open,
                    transaction_id,
                    user_id,
                    occurred_at: Utc::now(),
                }))
            },
        )
    }

    // ---- queries ----------------------------------------------------------

    /// Totals and in-stock batches of one product.
    pub fn current_stock(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> DomainResult<StockOverview> {
        self.product(tenant_id, product_id)?;
        match self.existing_stream(tenant_id, product_id)? {
            Some(stream) => {
                let stock = lock(&stream)?;
                Ok(StockOverview {
                    product_id,
                    amount: stock.total_amount(),
                    amount_opened: stock.total_opened_amount(),
                    batches: stock.batches().filter(|b| b.in_stock()).cloned().collect(),
                })
            }
            None => Ok(StockOverview {
                product_id,
                amount: Decimal::ZERO,
                amount_opened: Decimal::ZERO,
                batches: Vec::new(),
            }),
        }
    }

    /// Products below their minimum stock, evaluated over the hierarchy.
    pub fn missing_stock(&self, tenant_id: TenantId) -> DomainResult<Vec<MissingStock>> {
        let catalogs = read(&self.catalogs)?;
        let Some(catalog) = catalogs.get(&tenant_id) else {
            return Ok(Vec::new());
        };
        let graph = self.graph_or_empty(tenant_id)?;

        let mut totals: BTreeMap<ProductId, StockTotals> = BTreeMap::new();
        for product in catalog.iter() {
            if let Some(stream) = self.existing_stream(tenant_id, product.id)? {
                let stock = lock(&stream)?;
                totals.insert(
                    product.id,
                    StockTotals {
                        amount: stock.total_amount(),
                        amount_opened: stock.total_opened_amount(),
                    },
                );
            }
        }

        Ok(evaluate_missing(catalog, &totals, &graph))
    }

    /// A product's in-stock batches in consumption order.
    pub fn next_batches(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> DomainResult<Vec<StockBatch>> {
        let product = self.product(tenant_id, product_id)?;
        match self.existing_stream(tenant_id, product_id)? {
            Some(stream) => {
                let stock = lock(&stream)?;
                let batches: Vec<StockBatch> = stock.batches().cloned().collect();
                Ok(rank_batches(&product, &batches)
                    .into_iter()
                    .cloned()
                    .collect())
            }
            None => Ok(Vec::new()),
        }
    }

    /// Which product of a family a consumption of `parent` would draw from.
    pub fn effective_substitute(
        &self,
        tenant_id: TenantId,
        parent: ProductId,
    ) -> DomainResult<ProductId> {
        let catalogs = read(&self.catalogs)?;
        let catalog = catalogs.get(&tenant_id).ok_or(DomainError::NotFound)?;

        let mut family: Vec<ProductId> = vec![parent];
        family.extend(catalog.children(parent).iter().map(|c| c.id));

        let mut by_product: BTreeMap<ProductId, Vec<StockBatch>> = BTreeMap::new();
        for product_id in family {
            if let Some(stream) = self.existing_stream(tenant_id, product_id)? {
                let stock = lock(&stream)?;
                by_product.insert(product_id, stock.batches().cloned().collect());
            }
        }

        larder_planner::effective_substitute(catalog, parent, &by_product)
    }

    /// Amount-weighted average acquisition price, per stocking unit.
    pub fn average_price(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> DomainResult<Option<Decimal>> {
        match self.existing_stream(tenant_id, product_id)? {
            Some(stream) => {
                let stock = lock(&stream)?;
                Ok(larder_pricing::average_price(stock.entries()))
            }
            None => Ok(None),
        }
    }

    /// Priced acquisitions ordered by purchase date.
    pub fn price_history(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> DomainResult<Vec<PricePoint>> {
        match self.existing_stream(tenant_id, product_id)? {
            Some(stream) => {
                let stock = lock(&stream)?;
                Ok(larder_pricing::price_history(stock.entries()))
            }
            None => Ok(Vec::new()),
        }
    }

    /// Price of the stock consumed next, per pricing unit.
    pub fn current_price(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> DomainResult<Option<Decimal>> {
        let Some(product) = read(&self.catalogs)?
            .get(&tenant_id)
            .and_then(|c| c.get(product_id))
            .cloned()
        else {
            return Ok(None);
        };
        let graph = self.graph_or_empty(tenant_id)?;

        match self.existing_stream(tenant_id, product_id)? {
            Some(stream) => {
                let stock = lock(&stream)?;
                let batches: Vec<StockBatch> = stock.batches().cloned().collect();
                Ok(larder_pricing::current_price(
                    &product,
                    &batches,
                    stock.entries(),
                    &graph,
                ))
            }
            None => Ok(None),
        }
    }

    /// Ledger entries of a tenant (optionally one product), bounded by the
    /// business date of the movement, in chronological order.
    pub fn journal(
        &self,
        tenant_id: TenantId,
        product_id: Option<ProductId>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> DomainResult<Vec<LedgerEntry>> {
        let streams = read(&self.streams)?;
        let mut keys: Vec<StreamKey> = streams
            .keys()
            .filter(|(t, p)| *t == tenant_id && product_id.is_none_or(|id| *p == id))
            .copied()
            .collect();
        keys.sort();
        let arcs: Vec<Arc<Mutex<ProductStock>>> =
            keys.iter().map(|key| Arc::clone(&streams[key])).collect();
        drop(streams);

        let mut entries = Vec::new();
        for arc in arcs {
            let stock = lock(&arc)?;
            entries.extend(
                stock
                    .entries()
                    .iter()
                    .filter(|e| {
                        let day = e.occurred_at.date_naive();
                        from.is_none_or(|f| day >= f) && to.is_none_or(|t| day <= t)
                    })
                    .cloned(),
            );
        }
        entries.sort_by_key(|e| (e.occurred_at, e.id));
        Ok(entries)
    }

    // ---- internals --------------------------------------------------------

    fn product(&self, tenant_id: TenantId, product_id: ProductId) -> DomainResult<Product> {
        let catalogs = read(&self.catalogs)?;
        let catalog = catalogs.get(&tenant_id).ok_or(DomainError::NotFound)?;
        catalog.require(product_id).cloned()
    }

    fn graph_or_empty(&self, tenant_id: TenantId) -> DomainResult<ConversionGraph> {
        match read(&self.graphs)?.get(&tenant_id) {
            Some(graph) => Ok(graph.clone()),
            None => ConversionGraph::build(Vec::new()),
        }
    }

    /// Strict unit conversion for ledger mutations; `NoConversionPath` is an
    /// error here, never a silent factor of 1.
    fn convert_strict(
        &self,
        tenant_id: TenantId,
        product: &Product,
        from: UnitId,
        to: UnitId,
        amount: Decimal,
    ) -> DomainResult<Decimal> {
        if from == to {
            return Ok(amount);
        }
        let graphs = read(&self.graphs)?;
        let graph = graphs
            .get(&tenant_id)
            .ok_or(DomainError::NoConversionPath { from, to })?;
        let factor = graph.resolve(product.id, product.stocking_unit, from, to)?;
        Ok(amount * factor)
    }

    fn stream(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> DomainResult<Arc<Mutex<ProductStock>>> {
        if let Some(stream) = read(&self.streams)?.get(&(tenant_id, product_id)) {
            return Ok(Arc::clone(stream));
        }
        let mut streams = write(&self.streams)?;
        Ok(Arc::clone(streams.entry((tenant_id, product_id)).or_insert_with(
            || Arc::new(Mutex::new(ProductStock::empty(product_id))),
        )))
    }

    fn existing_stream(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> DomainResult<Option<Arc<Mutex<ProductStock>>>> {
        Ok(read(&self.streams)?
            .get(&(tenant_id, product_id))
            .map(Arc::clone))
    }

    /// Run one movement: replay check, decide, append, apply, publish.
    /// The product mutex is held across the whole sequence.
    fn execute<F>(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        idempotency_key: Option<Uuid>,
        replay_check: ReplayCheck,
        build: F,
    ) -> DomainResult<MovementReceipt>
    where
        F: FnOnce(&ProductStock, Uuid) -> DomainResult<StockCommand>,
    {
        let stream = self.stream(tenant_id, product_id)?;
        let mut stock = lock(&stream)?;

        if let Some(key) = idempotency_key {
            if let Some(receipt) = read(&self.receipts)?.get(&(tenant_id, key)) {
                if replay_valid(&stock, receipt, replay_check) {
                    debug!(%tenant_id, %product_id, %key, "idempotent replay, returning stored receipt");
                    return Ok(receipt.clone());
                }
            }
        }

        let transaction_id = idempotency_key.unwrap_or_else(Uuid::now_v7);
        let command = build(&stock, transaction_id)?;
        let events = stock.handle(&command)?;

        let mut entry_ids = Vec::new();
        let mut touched: Vec<StockId> = Vec::new();
        for event in &events {
            stock.apply(event);
            match event {
                StockEvent::EntryAppended { entry }
                | StockEvent::BatchOpened { entry, .. } => {
                    entry_ids.push(entry.id);
                    push_touched(&mut touched, entry.stock_id);
                }
                StockEvent::EntryUndone { entry_id, .. } => {
                    entry_ids.push(*entry_id);
                    if let Some(entry) = stock.entry(*entry_id) {
                        push_touched(&mut touched, entry.stock_id);
                    }
                }
            }

            let envelope = EventEnvelope::new(
                Uuid::now_v7(),
                tenant_id,
                product_id.as_aggregate(),
                AGGREGATE_TYPE,
                stock.version(),
                event.clone(),
            );
            if let Err(err) = self.bus.publish(envelope) {
                warn!(%tenant_id, %product_id, ?err, "event publication failed");
            }
        }

        let batches = touched
            .iter()
            .map(|stock_id| BatchChange {
                stock_id: *stock_id,
                amount: stock
                    .batch(*stock_id)
                    .map_or(Decimal::ZERO, |b| b.amount),
            })
            .collect();
        let receipt = MovementReceipt {
            transaction_id,
            entry_ids,
            batches,
        };

        if let Some(key) = idempotency_key {
            write(&self.receipts)?.insert((tenant_id, key), receipt.clone());
        }

        Ok(receipt)
    }
}

fn push_touched(touched: &mut Vec<StockId>, stock_id: StockId) {
    if !touched.contains(&stock_id) {
        touched.push(stock_id);
    }
}

fn replay_valid(stock: &ProductStock, receipt: &MovementReceipt, check: ReplayCheck) -> bool {
    receipt.entry_ids.iter().all(|id| {
        stock.entry(*id).is_some_and(|entry| match check {
            ReplayCheck::EntriesLive => !entry.undone,
            ReplayCheck::EntriesUndone => entry.undone,
        })
    })
}

fn lock<T>(mutex: &Mutex<T>) -> DomainResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| DomainError::concurrent("product stream lock poisoned"))
}

fn read<T>(lock: &RwLock<T>) -> DomainResult<std::sync::RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| DomainError::concurrent("registry lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> DomainResult<std::sync::RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| DomainError::concurrent("registry lock poisoned"))
}
