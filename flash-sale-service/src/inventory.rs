use async_trait::async_trait;
use shared::StockItem;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use crate::error::SaleError;
use crate::store::SaleTransaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LockStrategy {
    /// Compare-and-swap on the row version; losers get `ConcurrentConflict`.
    #[default]
    Optimistic,
    /// One decrement at a time inside this process.
    Pessimistic,
}

/// Exclusive hold on the decrement path. Taken before the transaction opens
/// and released after it has committed or rolled back.
pub struct Section(Option<OwnedMutexGuard<()>>);

impl Section {
    pub fn is_exclusive(&self) -> bool {
        self.0.is_some()
    }
}

#[async_trait]
pub trait InventoryDecrementer: Send + Sync {
    /// Waits for the right to decrement. Callers must hold the returned
    /// section for the whole transaction and must not open the transaction
    /// before they have it.
    async fn enter(&self) -> Section;

    /// Takes one unit of `item_id` inside `tx` and returns the item as sold.
    /// On error nothing was written.
    async fn decrement(&self, tx: &mut dyn SaleTransaction, item_id: i32) -> Result<StockItem, SaleError>;

    fn strategy(&self) -> LockStrategy;
}

pub fn decrementer(strategy: LockStrategy) -> Arc<dyn InventoryDecrementer> {
    match strategy {
        LockStrategy::Optimistic => Arc::new(OptimisticDecrementer),
        LockStrategy::Pessimistic => Arc::new(PessimisticDecrementer::default()),
    }
}

async fn load_available(tx: &mut dyn SaleTransaction, item_id: i32) -> Result<StockItem, SaleError> {
    let item = tx
        .find_stock(item_id)
        .await?
        .ok_or(SaleError::UnknownItem(item_id))?;

    if item.is_sold_out() {
        debug!(item_id, sale = item.sale, count = item.count, "item sold out");
        return Err(SaleError::InsufficientStock);
    }
    Ok(item)
}

pub struct OptimisticDecrementer;

#[async_trait]
impl InventoryDecrementer for OptimisticDecrementer {
    async fn enter(&self) -> Section {
        Section(None)
    }

    async fn decrement(&self, tx: &mut dyn SaleTransaction, item_id: i32) -> Result<StockItem, SaleError> {
        let item = load_available(tx, item_id).await?;

        let rows = tx.conditional_decrement(item.id, item.version).await?;
        if rows == 0 {
            debug!(item_id, observed_version = item.version, "lost decrement race");
            return Err(SaleError::ConcurrentConflict);
        }

        Ok(item.sold_one())
    }

    fn strategy(&self) -> LockStrategy {
        LockStrategy::Optimistic
    }
}

/// Serializes every decrement in this process. Other instances are not
/// coordinated with; their writes still add up because the update is
/// relative to the row and stops at `count`.
#[derive(Default)]
pub struct PessimisticDecrementer {
    section: Arc<Mutex<()>>,
}

#[async_trait]
impl InventoryDecrementer for PessimisticDecrementer {
    async fn enter(&self) -> Section {
        Section(Some(self.section.clone().lock_owned().await))
    }

    async fn decrement(&self, tx: &mut dyn SaleTransaction, item_id: i32) -> Result<StockItem, SaleError> {
        load_available(tx, item_id).await?;

        tx.exclusive_decrement(item_id)
            .await?
            .ok_or(SaleError::InsufficientStock)
    }

    fn strategy(&self) -> LockStrategy {
        LockStrategy::Pessimistic
    }
}
