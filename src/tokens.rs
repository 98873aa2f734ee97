//! Token lifecycle: load the latest stored token, measure freshness with a
//! safety margin, and refresh under a per-shop lock so concurrent cycles
//! never race a one-time-use refresh token.

use crate::models::{Platform, PlatformToken, ShopeeCredential, TikTokCredential};
use crate::store::{Store, StoreError};
use crate::{shopee, tiktok};
use chrono::{Duration, Utc};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error(transparent)]
    Shopee(#[from] shopee::ShopeeError),
    #[error(transparent)]
    Tiktok(#[from] tiktok::TikTokError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no stored token for {platform} shop {shop_id}; authorize the shop first")]
    Missing { platform: &'static str, shop_id: String },
}

pub struct TokenManager {
    store: Store,
    http: Client,
    safety: Duration,
    locks: Mutex<HashMap<(Platform, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(store: Store, http: Client) -> Self {
        let safety_secs = std::env::var("TOKEN_SAFETY_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);
        Self {
            store,
            http,
            safety: Duration::seconds(safety_secs),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, platform: Platform, shop_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry((platform, shop_id.to_string()))
            .or_default()
            .clone()
    }

    async fn stored_fresh(
        &self,
        platform: Platform,
        shop_id: &str,
    ) -> Result<Option<PlatformToken>, TokenError> {
        let token = self.store.latest_token(platform, shop_id).await?;
        Ok(token.filter(|t| t.is_fresh(Utc::now(), self.safety)))
    }

    pub async fn shopee_token(
        &self,
        credential: &ShopeeCredential,
        shop_id: i64,
    ) -> Result<String, TokenError> {
        let shop_key = shop_id.to_string();
        if let Some(token) = self.stored_fresh(Platform::Shopee, &shop_key).await? {
            return Ok(token.access_token);
        }

        let lock = self.lock_for(Platform::Shopee, &shop_key);
        let _guard = lock.lock().await;
        // another caller may have refreshed while we waited
        if let Some(token) = self.stored_fresh(Platform::Shopee, &shop_key).await? {
            return Ok(token.access_token);
        }

        let stale = self
            .store
            .latest_token(Platform::Shopee, &shop_key)
            .await?
            .ok_or(TokenError::Missing {
                platform: "shopee",
                shop_id: shop_key.clone(),
            })?;
        let fresh =
            shopee::auth::refresh_access_token(&self.http, credential, shop_id, &stale.refresh_token)
                .await?;
        self.store.insert_token(&fresh).await?;
        info!(target: "agni.tokens", shop_id, expires_at = %fresh.expires_at, "shopee token refreshed");
        Ok(fresh.access_token)
    }

    pub async fn tiktok_token(
        &self,
        credential: &TikTokCredential,
        shop_id: &str,
    ) -> Result<String, TokenError> {
        if let Some(token) = self.stored_fresh(Platform::Tiktok, shop_id).await? {
            return Ok(token.access_token);
        }

        let lock = self.lock_for(Platform::Tiktok, shop_id);
        let _guard = lock.lock().await;
        if let Some(token) = self.stored_fresh(Platform::Tiktok, shop_id).await? {
            return Ok(token.access_token);
        }

        let stale = self
            .store
            .latest_token(Platform::Tiktok, shop_id)
            .await?
            .ok_or_else(|| TokenError::Missing {
                platform: "tiktok",
                shop_id: shop_id.to_string(),
            })?;
        let fresh =
            tiktok::auth::refresh_access_token(&self.http, credential, shop_id, &stale.refresh_token)
                .await?;
        self.store.insert_token(&fresh).await?;
        info!(target: "agni.tokens", shop_id, expires_at = %fresh.expires_at, "tiktok token refreshed");
        Ok(fresh.access_token)
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{Platform, PlatformToken};
    use chrono::{Duration, Utc};

    fn token(expires_in_secs: i64) -> PlatformToken {
        PlatformToken {
            platform: Platform::Shopee,
            shop_id: "99".into(),
            access_token: "tok".into(),
            refresh_token: "ref".into(),
            expires_at: Utc::now() + Duration::seconds(expires_in_secs),
        }
    }

    #[test]
    fn freshness_honors_safety_margin() {
        let safety = Duration::seconds(120);
        let now = Utc::now();
        assert!(token(3600).is_fresh(now, safety));
        assert!(!token(60).is_fresh(now, safety));
        assert!(!token(-10).is_fresh(now, safety));
    }
}
