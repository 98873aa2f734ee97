pub mod auth;
pub mod catalog;
pub mod inventory;
pub mod sign;

use crate::models::TikTokCredential;
use once_cell::sync::Lazy;
use std::env;
use thiserror::Error;

pub static API_HOST: Lazy<String> = Lazy::new(|| {
    env::var("TTS_API_HOST").unwrap_or_else(|_| "https://open-api.tiktokglobalshop.com".to_string())
});

pub static AUTH_HOST: Lazy<String> = Lazy::new(|| {
    env::var("TTS_AUTH_HOST").unwrap_or_else(|_| "https://auth.tiktok-shops.com".to_string())
});

pub static FETCH_DELAY_MS: Lazy<u64> = Lazy::new(|| {
    env::var("TTS_FETCH_DELAY_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100)
});

/// Env-based fallback when no `platform_config` row exists.
pub fn credential_from_env() -> Option<TikTokCredential> {
    Some(TikTokCredential {
        app_key: env::var("TTS_APP_KEY").ok()?,
        app_secret: env::var("TTS_APP_SECRET").ok()?,
    })
}

#[derive(Debug, Error)]
pub enum TikTokError {
    #[error("tiktok auth rejected: {0}")]
    Auth(String),
    #[error("tiktok transport error: {0}")]
    Transport(String),
    #[error("tiktok api error {code}: {message}")]
    Platform { code: i64, message: String },
    #[error("tiktok rate limit hit")]
    RateLimited,
    #[error("tiktok response unreadable: {0}")]
    Parse(String),
}
