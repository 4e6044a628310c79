use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::info;
use super::{ExpiringStore, StoreError};

/// `ExpiringStore` on Redis. Clones share one multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn_manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;
        info!("Connected to Redis");
        Ok(Self { conn_manager })
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    // Redis rejects a zero expiry.
    ttl.as_secs().max(1)
}

#[async_trait]
impl ExpiringStore for RedisStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn_manager.clone();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn.set_ex(key, value, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn increment_in_window(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let mut conn = self.conn_manager.clone();

        // SET NX only fires for the first request of a window, so the expiry
        // is fixed there and INCR never touches it afterwards.
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(key)
            .arg(0)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .ignore()
            .incr(key, 1)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let value: Option<String> = conn.get_del(key).await?;
        Ok(value)
    }
}
