pub mod auth;
pub mod catalog;
pub mod sign;

use crate::models::ShopeeCredential;
use once_cell::sync::Lazy;
use std::env;
use thiserror::Error;

pub static HOST: Lazy<String> = Lazy::new(|| {
    env::var("SHOPEE_API_HOST").unwrap_or_else(|_| "https://partner.shopeemobile.com".to_string())
});

pub static FETCH_DELAY_MS: Lazy<u64> = Lazy::new(|| {
    env::var("SHOPEE_FETCH_DELAY_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(500)
});

/// Env-based fallback when no `platform_config` row exists.
pub fn credential_from_env() -> Option<ShopeeCredential> {
    let partner_id = env::var("SHOPEE_PARTNER_ID").ok()?.parse().ok()?;
    let partner_key = env::var("SHOPEE_PARTNER_KEY").ok()?;
    let shop_id = env::var("SHOPEE_SHOP_ID")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    Some(ShopeeCredential {
        partner_id,
        partner_key,
        shop_id,
    })
}

#[derive(Debug, Error)]
pub enum ShopeeError {
    #[error("shopee auth rejected: {0}")]
    Auth(String),
    #[error("shopee transport error: {0}")]
    Transport(String),
    #[error("shopee api error {error}: {message}")]
    Platform { error: String, message: String },
    #[error("shopee rate limit hit")]
    RateLimited,
    #[error("shopee response unreadable: {0}")]
    Parse(String),
}
