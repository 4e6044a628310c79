//! In-memory stores for tests, with hooks for injecting faults and forcing
//! interleavings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Barrier;
use tokio::time::Instant;
use uuid::Uuid;
use super::{ExpiringStore, OutboxStore, PendingEvent, SaleStore, SaleTransaction, StoreError};

#[derive(Default)]
struct Tables {
    stock: HashMap<i32, StockItem>,
    users: HashMap<i32, User>,
    orders: Vec<Order>,
    events: Vec<StoredEvent>,
    next_order_id: i32,
}

struct StoredEvent {
    id: Uuid,
    event: OrderAdmitted,
    processed: bool,
}

#[derive(Default)]
struct Hooks {
    fail_order_insert: AtomicBool,
    stock_writes: AtomicUsize,
    open_transactions: AtomicUsize,
    read_barrier: Mutex<Option<Arc<Barrier>>>,
}

#[derive(Clone, Default)]
pub struct MemorySaleStore {
    tables: Arc<Mutex<Tables>>,
    hooks: Arc<Hooks>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemorySaleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stock(self, item: StockItem) -> Self {
        lock(&self.tables).stock.insert(item.id, item);
        self
    }

    pub fn with_user(self, id: i32, name: &str) -> Self {
        lock(&self.tables).users.insert(id, User { id, name: name.to_string() });
        self
    }

    pub fn stock(&self, id: i32) -> Option<StockItem> {
        lock(&self.tables).stock.get(&id).cloned()
    }

    pub fn orders(&self) -> Vec<Order> {
        lock(&self.tables).orders.clone()
    }

    pub fn events(&self) -> Vec<OrderAdmitted> {
        lock(&self.tables).events.iter().map(|e| e.event.clone()).collect()
    }

    /// Order ids of events the outbox relay has not marked processed.
    pub fn unprocessed_events(&self) -> Vec<i32> {
        lock(&self.tables)
            .events
            .iter()
            .filter(|e| !e.processed)
            .map(|e| e.event.order_id)
            .collect()
    }

    /// Transactions begun and not yet committed, rolled back or dropped.
    pub fn open_transactions(&self) -> usize {
        self.hooks.open_transactions.load(Ordering::SeqCst)
    }

    /// Number of stock updates attempted, successful or not.
    pub fn stock_writes(&self) -> usize {
        self.hooks.stock_writes.load(Ordering::SeqCst)
    }

    pub fn fail_order_inserts(&self, fail: bool) {
        self.hooks.fail_order_insert.store(fail, Ordering::SeqCst);
    }

    /// Every transactional stock read waits on `barrier` before returning.
    pub fn hold_reads_at(&self, barrier: Arc<Barrier>) {
        *lock(&self.hooks.read_barrier) = Some(barrier);
    }
}

#[async_trait]
impl SaleStore for MemorySaleStore {
    async fn find_stock(&self, id: i32) -> Result<Option<StockItem>, StoreError> {
        Ok(self.stock(id))
    }

    async fn find_user(&self, id: i32) -> Result<Option<User>, StoreError> {
        Ok(lock(&self.tables).users.get(&id).cloned())
    }

    async fn begin(&self) -> Result<Box<dyn SaleTransaction>, StoreError> {
        self.hooks.open_transactions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryTransaction {
            tables: self.tables.clone(),
            hooks: self.hooks.clone(),
            undo: Vec::new(),
        }))
    }
}

enum Undo {
    Decrement(i32),
    Order(i32),
    Event(i32),
}

/// Writes land immediately and are reverted on rollback, or on drop when the
/// transaction was never finished.
pub struct MemoryTransaction {
    tables: Arc<Mutex<Tables>>,
    hooks: Arc<Hooks>,
    undo: Vec<Undo>,
}

impl MemoryTransaction {
    fn revert(&mut self) {
        let mut tables = lock(&self.tables);
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Decrement(id) => {
                    if let Some(item) = tables.stock.get_mut(&id) {
                        item.sale -= 1;
                        item.version -= 1;
                    }
                }
                Undo::Order(order_id) => tables.orders.retain(|o| o.id != order_id),
                Undo::Event(order_id) => tables.events.retain(|e| e.event.order_id != order_id),
            }
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.revert();
        self.hooks.open_transactions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SaleTransaction for MemoryTransaction {
    async fn find_stock(&mut self, id: i32) -> Result<Option<StockItem>, StoreError> {
        let item = lock(&self.tables).stock.get(&id).cloned();
        let barrier = lock(&self.hooks.read_barrier).clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        Ok(item)
    }

    async fn conditional_decrement(&mut self, id: i32, expected_version: i32) -> Result<usize, StoreError> {
        self.hooks.stock_writes.fetch_add(1, Ordering::SeqCst);
        let mut tables = lock(&self.tables);
        match tables.stock.get_mut(&id) {
            Some(item) if item.version == expected_version => {
                *item = item.sold_one();
                drop(tables);
                self.undo.push(Undo::Decrement(id));
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn exclusive_decrement(&mut self, id: i32) -> Result<Option<StockItem>, StoreError> {
        self.hooks.stock_writes.fetch_add(1, Ordering::SeqCst);
        let mut tables = lock(&self.tables);
        match tables.stock.get_mut(&id) {
            Some(item) if !item.is_sold_out() => {
                *item = item.sold_one();
                let updated = item.clone();
                drop(tables);
                self.undo.push(Undo::Decrement(id));
                Ok(Some(updated))
            }
            _ => Ok(None),
        }
    }

    async fn insert_order(&mut self, stock_id: i32, name: &str, created_at: DateTime<Utc>) -> Result<i32, StoreError> {
        if self.hooks.fail_order_insert.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("order insert failed".to_string()));
        }
        let mut tables = lock(&self.tables);
        tables.next_order_id += 1;
        let id = tables.next_order_id;
        tables.orders.push(Order {
            id,
            stock_id,
            name: name.to_string(),
            created_at,
        });
        drop(tables);
        self.undo.push(Undo::Order(id));
        Ok(id)
    }

    async fn append_event(&mut self, event: &OrderAdmitted) -> Result<(), StoreError> {
        lock(&self.tables).events.push(StoredEvent {
            id: Uuid::new_v4(),
            event: event.clone(),
            processed: false,
        });
        self.undo.push(Undo::Event(event.order_id));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.undo.clear();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.revert();
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for MemorySaleStore {
    async fn pending_events(&self, limit: i64) -> Result<Vec<PendingEvent>, StoreError> {
        let tables = lock(&self.tables);
        let mut pending: Vec<&StoredEvent> = tables.events.iter().filter(|e| !e.processed).collect();
        pending.sort_by_key(|e| e.event.created_at);

        pending
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|e| -> Result<PendingEvent, StoreError> {
                Ok(PendingEvent {
                    id: e.id,
                    aggregate_id: e.event.stock_id,
                    event_type: ORDER_ADMITTED_EVENT.to_string(),
                    payload: e.event.to_json()?,
                })
            })
            .collect()
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError> {
        if let Some(stored) = lock(&self.tables).events.iter_mut().find(|e| e.id == id) {
            stored.processed = true;
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryExpiringStore {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryExpiringStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail until switched back.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Drops a key regardless of its TTL.
    pub fn evict(&self, key: &str) {
        lock(&self.entries).remove(key);
    }

    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let entries = lock(&self.entries);
        let (_, expires_at) = entries.get(key)?;
        expires_at.checked_duration_since(Instant::now())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("keyed store is down".to_string()));
        }
        Ok(())
    }

    fn live(entries: &mut HashMap<String, (String, Instant)>, key: &str) -> Option<String> {
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }
}

#[async_trait]
impl ExpiringStore for MemoryExpiringStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(Self::live(&mut lock(&self.entries), key).is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        Ok(Self::live(&mut lock(&self.entries), key))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_available()?;
        lock(&self.entries).insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn increment_in_window(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        self.check_available()?;
        let mut entries = lock(&self.entries);
        let current = Self::live(&mut entries, key);
        let (count, expires_at) = match current {
            Some(value) => {
                let count = value
                    .parse::<i64>()
                    .map_err(|e| StoreError::Unavailable(format!("counter {key} is not a number: {e}")))?;
                let expires_at = entries.get(key).map(|(_, at)| *at).unwrap_or_else(|| Instant::now() + ttl);
                (count, expires_at)
            }
            None => (0, Instant::now() + ttl),
        };
        let next = count + 1;
        entries.insert(key.to_string(), (next.to_string(), expires_at));
        Ok(next)
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        let mut entries = lock(&self.entries);
        let value = Self::live(&mut entries, key);
        entries.remove(key);
        Ok(value)
    }
}
