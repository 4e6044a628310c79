use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use crate::store::{window_key, ExpiringStore, StoreError};

/// Reads the per-item flag that marks a flash sale as running.
#[derive(Clone)]
pub struct FlashWindowGate {
    store: Arc<dyn ExpiringStore>,
}

impl FlashWindowGate {
    pub fn new(store: Arc<dyn ExpiringStore>) -> Self {
        Self { store }
    }

    /// An unreadable flag counts as closed.
    pub async fn is_open(&self, item_id: i32) -> bool {
        match self.store.exists(&window_key(item_id)).await {
            Ok(open) => open,
            Err(e) => {
                warn!(item_id, error = %e, "flash window lookup failed, treating sale as closed");
                false
            }
        }
    }

    /// Opens the sale for `duration`; the flag lapses by itself afterwards.
    pub async fn open(&self, item_id: i32, duration: Duration) -> Result<(), StoreError> {
        self.store.set_with_ttl(&window_key(item_id), "1", duration).await?;
        info!(item_id, open_for_secs = duration.as_secs(), "flash window opened");
        Ok(())
    }
}
