//! Collaborator seams: the relational store that owns stock and orders, and
//! the expiring key-value store that owns flash windows, tokens and rate
//! counters.

pub mod postgres;
pub mod keyed;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{OrderAdmitted, StockItem, User};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<bb8::RunError<diesel_async::pooled_connection::PoolError>> for StoreError {
    fn from(e: bb8::RunError<diesel_async::pooled_connection::PoolError>) -> Self {
        StoreError::Pool(e.to_string())
    }
}

/// Relational store holding stock, users and orders.
#[async_trait]
pub trait SaleStore: Send + Sync {
    async fn find_stock(&self, id: i32) -> Result<Option<StockItem>, StoreError>;

    async fn find_user(&self, id: i32) -> Result<Option<User>, StoreError>;

    /// Opens a local transaction. The caller must finish it with `commit` or
    /// `rollback`.
    async fn begin(&self) -> Result<Box<dyn SaleTransaction>, StoreError>;
}

/// One local transaction on the relational store. Writes become visible to
/// other transactions only after `commit`.
#[async_trait]
pub trait SaleTransaction: Send {
    async fn find_stock(&mut self, id: i32) -> Result<Option<StockItem>, StoreError>;

    /// `sale += 1, version += 1` where `id` and `version` both match.
    /// Returns the number of rows updated, zero when the version moved on.
    async fn conditional_decrement(&mut self, id: i32, expected_version: i32) -> Result<usize, StoreError>;

    /// `sale += 1, version += 1` relative to the row as it stands, as long as
    /// `sale < count`. Returns the updated row, or `None` when nothing is left.
    async fn exclusive_decrement(&mut self, id: i32) -> Result<Option<StockItem>, StoreError>;

    async fn insert_order(&mut self, stock_id: i32, name: &str, created_at: DateTime<Utc>) -> Result<i32, StoreError>;

    async fn append_event(&mut self, event: &OrderAdmitted) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// An outbox row that has not been relayed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub id: Uuid,
    pub aggregate_id: i32,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Read side of the transactional outbox.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Oldest unprocessed events first.
    async fn pending_events(&self, limit: i64) -> Result<Vec<PendingEvent>, StoreError>;

    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Key-value store whose entries disappear on their own once their TTL
/// lapses. Nothing in the service deletes keys except the single-use token
/// policy through `take`.
#[async_trait]
pub trait ExpiringStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Creates the counter at 0 with `ttl` when absent, then increments it,
    /// as one atomic step. An existing counter keeps its original expiry.
    async fn increment_in_window(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    /// Reads and deletes in one step.
    async fn take(&self, key: &str) -> Result<Option<String>, StoreError>;
}

pub fn window_key(item_id: i32) -> String {
    format!("flash:window:{item_id}")
}

pub fn token_key(user_id: i32, item_id: i32) -> String {
    format!("flash:token:{user_id}:{item_id}")
}

pub fn limit_key(user_id: i32) -> String {
    format!("flash:limit:{user_id}")
}
