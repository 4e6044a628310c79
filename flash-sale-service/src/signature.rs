use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use crate::error::SaleError;
use crate::store::{token_key, ExpiringStore, SaleStore, StoreError};

type HmacSha256 = Hmac<Sha256>;

/// What happens to a stored token once it has been verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TokenPolicy {
    /// The token stays usable until its TTL lapses.
    #[default]
    TtlOnly,
    /// The first successful verification removes the token.
    SingleUse,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub secret: String,
    pub ttl: Duration,
    pub policy: TokenPolicy,
}

/// Issues and checks the short-lived token a buyer must present to purchase.
/// The token binds one user to one item.
pub struct TokenService {
    keyed: Arc<dyn ExpiringStore>,
    sales: Arc<dyn SaleStore>,
    mac: HmacSha256,
    ttl: Duration,
    policy: TokenPolicy,
}

impl TokenService {
    pub fn new(
        keyed: Arc<dyn ExpiringStore>,
        sales: Arc<dyn SaleStore>,
        config: &TokenConfig,
    ) -> Result<Self, hmac::digest::InvalidLength> {
        Ok(Self {
            keyed,
            sales,
            mac: HmacSha256::new_from_slice(config.secret.as_bytes())?,
            ttl: config.ttl,
            policy: config.policy,
        })
    }

    pub fn policy(&self) -> TokenPolicy {
        self.policy
    }

    fn sign(&self, user_id: i32, item_id: i32) -> String {
        let mut mac = self.mac.clone();
        mac.update(format!("{user_id}:{item_id}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub async fn issue(&self, user_id: i32, item_id: i32) -> Result<String, SaleError> {
        let user = self
            .sales
            .find_user(user_id)
            .await?
            .ok_or(SaleError::UnknownUser(user_id))?;
        let item = self
            .sales
            .find_stock(item_id)
            .await?
            .ok_or(SaleError::UnknownItem(item_id))?;

        let token = self.sign(user.id, item.id);
        self.keyed
            .set_with_ttl(&token_key(user.id, item.id), &token, self.ttl)
            .await?;

        info!(user_id, item_id, ttl_secs = self.ttl.as_secs(), "issued purchase token");
        Ok(token)
    }

    /// A store failure verifies as `false`.
    pub async fn verify(&self, user_id: i32, item_id: i32, presented: &str) -> bool {
        match self.check(user_id, item_id, presented).await {
            Ok(valid) => valid,
            Err(e) => {
                warn!(user_id, item_id, error = %e, "token lookup failed, rejecting");
                false
            }
        }
    }

    async fn check(&self, user_id: i32, item_id: i32, presented: &str) -> Result<bool, StoreError> {
        let key = token_key(user_id, item_id);
        let Some(stored) = self.keyed.get(&key).await? else {
            return Ok(false);
        };
        if !constant_time_eq(stored.as_bytes(), presented.as_bytes()) {
            return Ok(false);
        }

        match self.policy {
            TokenPolicy::TtlOnly => Ok(true),
            // Only the caller whose take still finds the token wins a replay race.
            TokenPolicy::SingleUse => Ok(self
                .keyed
                .take(&key)
                .await?
                .is_some_and(|taken| constant_time_eq(taken.as_bytes(), presented.as_bytes()))),
        }
    }
}
