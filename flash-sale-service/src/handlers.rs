use chrono::Utc;
use shared::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use crate::config::Settings;
use crate::error::SaleError;
use crate::gate::AdmissionGate;
use crate::inventory::{decrementer, InventoryDecrementer};
use crate::signature::TokenService;
use crate::store::{ExpiringStore, SaleStore, SaleTransaction, StoreError};
use crate::user_limit::UserRateLimiter;
use crate::window::FlashWindowGate;

#[derive(Debug, Clone)]
pub struct PurchaseConfig {
    /// Unsigned purchases need an open flash window.
    pub enforce_window: bool,
    /// Signed purchases go through the per-user limiter.
    pub per_user_limit: bool,
    /// Unsigned purchases are refused outright.
    pub signed_only: bool,
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            enforce_window: true,
            per_user_limit: true,
            signed_only: false,
        }
    }
}

/// Runs a purchase attempt through every gate and, if it survives, sells one
/// unit and records the order in a single transaction.
pub struct PurchaseHandler {
    gate: AdmissionGate,
    wait_budget: Duration,
    window: FlashWindowGate,
    tokens: TokenService,
    limiter: UserRateLimiter,
    decrementer: Arc<dyn InventoryDecrementer>,
    sales: Arc<dyn SaleStore>,
    config: PurchaseConfig,
}

impl PurchaseHandler {
    pub fn new(
        sales: Arc<dyn SaleStore>,
        keyed: Arc<dyn ExpiringStore>,
        settings: &Settings,
    ) -> Result<Self, hmac::digest::InvalidLength> {
        Ok(Self {
            gate: AdmissionGate::new(&settings.admission),
            wait_budget: settings.admission.wait_budget,
            window: FlashWindowGate::new(keyed.clone()),
            tokens: TokenService::new(keyed.clone(), sales.clone(), &settings.token)?,
            limiter: UserRateLimiter::new(keyed, settings.user_limit.clone()),
            decrementer: decrementer(settings.strategy),
            sales,
            config: settings.purchase.clone(),
        })
    }

    pub async fn issue_token(&self, user_id: i32, item_id: i32) -> Result<String, SaleError> {
        self.tokens.issue(user_id, item_id).await
    }

    pub async fn open_window(&self, item_id: i32, duration: Duration) -> Result<(), SaleError> {
        if self.sales.find_stock(item_id).await?.is_none() {
            return Err(SaleError::UnknownItem(item_id));
        }
        self.window.open(item_id, duration).await?;
        Ok(())
    }

    /// Returns the id of the new order. A token without a user, or the other
    /// way round, is an invalid signature.
    pub async fn purchase(&self, item_id: i32, user_id: Option<i32>, token: Option<&str>) -> Result<i32, SaleError> {
        if !self.gate.try_admit(self.wait_budget).await {
            info!(item_id, "admission wait exhausted, shedding purchase");
            return Err(SaleError::Overloaded);
        }

        match (user_id, token) {
            (None, None) => self.check_unsigned(item_id).await?,
            (Some(user_id), Some(token)) => self.check_signed(item_id, user_id, token).await?,
            _ => return Err(SaleError::InvalidSignature),
        }

        let order = self.admit(item_id).await?;
        info!(
            order_id = order.id,
            item_id,
            user_id = ?user_id,
            strategy = ?self.decrementer.strategy(),
            "purchase admitted"
        );
        Ok(order.id)
    }

    async fn check_unsigned(&self, item_id: i32) -> Result<(), SaleError> {
        if self.config.signed_only {
            return Err(SaleError::InvalidSignature);
        }
        if self.config.enforce_window && !self.window.is_open(item_id).await {
            info!(item_id, "flash window closed");
            return Err(SaleError::ActivityClosed);
        }
        Ok(())
    }

    async fn check_signed(&self, item_id: i32, user_id: i32, token: &str) -> Result<(), SaleError> {
        if !self.tokens.verify(user_id, item_id, token).await {
            warn!(user_id, item_id, "purchase token rejected");
            return Err(SaleError::InvalidSignature);
        }
        if self.config.per_user_limit {
            let check = self.limiter.record_and_check(user_id).await;
            if check.limited {
                info!(user_id, count = check.count, "user over attempt limit");
                return Err(SaleError::RateLimited);
            }
        }
        Ok(())
    }

    async fn admit(&self, item_id: i32) -> Result<Order, SaleError> {
        // The section is released when `admit` returns, after the
        // transaction has finished either way.
        let section = self.decrementer.enter().await;
        debug!(item_id, exclusive = section.is_exclusive(), "entered decrement section");

        let mut tx = self.sales.begin().await?;

        let sold = match self.decrementer.decrement(tx.as_mut(), item_id).await {
            Ok(sold) => sold,
            Err(e) => {
                rollback(tx).await;
                return Err(e);
            }
        };

        match record_order(tx.as_mut(), &sold).await {
            Ok(order) => {
                tx.commit().await?;
                debug!(item_id, remaining = sold.remaining(), "stock decremented");
                Ok(order)
            }
            Err(e) => {
                error!(item_id, error = %e, "order insert failed, rolling back decrement");
                rollback(tx).await;
                Err(e.into())
            }
        }
    }
}

async fn record_order(tx: &mut dyn SaleTransaction, item: &StockItem) -> Result<Order, StoreError> {
    let created_at = Utc::now();
    let order_id = tx.insert_order(item.id, &item.name, created_at).await?;
    tx.append_event(&OrderAdmitted::new(order_id, item, created_at)).await?;

    Ok(Order {
        id: order_id,
        stock_id: item.id,
        name: item.name.clone(),
        created_at,
    })
}

async fn rollback(tx: Box<dyn SaleTransaction>) {
    if let Err(e) = tx.rollback().await {
        error!(error = %e, "failed to roll back sale transaction");
    }
}
