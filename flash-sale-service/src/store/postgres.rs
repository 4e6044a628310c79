use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::{bb8::Pool, AsyncDieselConnectionManager};
use diesel_async::{AnsiTransactionManager, AsyncPgConnection, RunQueryDsl, TransactionManager};
use shared::*;
use tracing::debug;
use crate::models::*;
use crate::schema::*;
use uuid::Uuid;
use super::{OutboxStore, PendingEvent, SaleStore, SaleTransaction, StoreError};

pub type DbPool = Pool<AsyncPgConnection>;

type OwnedConn = bb8::PooledConnection<'static, AsyncDieselConnectionManager<AsyncPgConnection>>;

#[derive(Clone)]
pub struct PgSaleStore {
    pool: DbPool,
}

impl PgSaleStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

async fn load_stock(conn: &mut AsyncPgConnection, id: i32) -> Result<Option<StockItem>, StoreError> {
    let row = stock::table
        .filter(stock::id.eq(id))
        .first::<DbStock>(conn)
        .await
        .optional()?;
    Ok(row.map(StockItem::from))
}

#[async_trait]
impl SaleStore for PgSaleStore {
    async fn find_stock(&self, id: i32) -> Result<Option<StockItem>, StoreError> {
        let mut conn = self.pool.get().await?;
        load_stock(&mut conn, id).await
    }

    async fn find_user(&self, id: i32) -> Result<Option<User>, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = users::table
            .filter(users::id.eq(id))
            .first::<DbUser>(&mut conn)
            .await
            .optional()?;
        Ok(row.map(User::from))
    }

    async fn begin(&self) -> Result<Box<dyn SaleTransaction>, StoreError> {
        let mut conn = self.pool.get_owned().await?;
        <AnsiTransactionManager as TransactionManager<AsyncPgConnection>>::begin_transaction(&mut conn).await?;
        Ok(Box::new(PgSaleTransaction { conn }))
    }
}

#[async_trait]
impl OutboxStore for PgSaleStore {
    async fn pending_events(&self, limit: i64) -> Result<Vec<PendingEvent>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(limit)
            .load::<DbOutboxEvent>(&mut conn)
            .await?;
        Ok(rows.into_iter().map(PendingEvent::from).collect())
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(outbox_events::table.filter(outbox_events::id.eq(id)))
            .set(outbox_events::processed.eq(true))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}

/// A transaction pinned to one pooled connection for its whole life.
pub struct PgSaleTransaction {
    conn: OwnedConn,
}

#[async_trait]
impl SaleTransaction for PgSaleTransaction {
    async fn find_stock(&mut self, id: i32) -> Result<Option<StockItem>, StoreError> {
        load_stock(&mut self.conn, id).await
    }

    async fn conditional_decrement(&mut self, id: i32, expected_version: i32) -> Result<usize, StoreError> {
        let rows = diesel::update(
            stock::table
                .filter(stock::id.eq(id))
                .filter(stock::version.eq(expected_version)),
        )
        .set((
            stock::sale.eq(stock::sale + 1),
            stock::version.eq(stock::version + 1),
        ))
        .execute(&mut self.conn)
        .await?;

        debug!(stock_id = id, expected_version, rows, "conditional decrement");
        Ok(rows)
    }

    async fn exclusive_decrement(&mut self, id: i32) -> Result<Option<StockItem>, StoreError> {
        // Relative to the locked row, so a writer from another instance that
        // got there first is counted rather than overwritten.
        let row = diesel::update(
            stock::table
                .filter(stock::id.eq(id))
                .filter(stock::sale.lt(stock::count)),
        )
        .set((
            stock::sale.eq(stock::sale + 1),
            stock::version.eq(stock::version + 1),
        ))
        .get_result::<DbStock>(&mut self.conn)
        .await
        .optional()?;

        debug!(stock_id = id, updated = row.is_some(), "exclusive decrement");
        Ok(row.map(StockItem::from))
    }

    async fn insert_order(&mut self, stock_id: i32, name: &str, created_at: DateTime<Utc>) -> Result<i32, StoreError> {
        let new_order = NewOrder {
            stock_id,
            name: name.to_string(),
            created_at,
        };

        let order_id = diesel::insert_into(orders::table)
            .values(&new_order)
            .returning(orders::id)
            .get_result::<i32>(&mut self.conn)
            .await?;
        Ok(order_id)
    }

    async fn append_event(&mut self, event: &OrderAdmitted) -> Result<(), StoreError> {
        let outbox_event = NewOutboxEvent::order_admitted(event)?;

        diesel::insert_into(outbox_events::table)
            .values(&outbox_event)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut conn = self.conn;
        <AnsiTransactionManager as TransactionManager<AsyncPgConnection>>::commit_transaction(&mut conn).await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut conn = self.conn;
        <AnsiTransactionManager as TransactionManager<AsyncPgConnection>>::rollback_transaction(&mut conn).await?;
        Ok(())
    }
}
