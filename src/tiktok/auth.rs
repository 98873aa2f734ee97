//! Token refresh against the TikTok Shop auth host. The refresh endpoint
//! authenticates with the app secret directly and is not signed.

use super::{AUTH_HOST, TikTokError};
use crate::http::send_with_retry;
use crate::models::{Platform, PlatformToken, TikTokCredential};
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RefreshEnvelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<RefreshData>,
}

#[derive(Debug, Deserialize)]
struct RefreshData {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    /// Absolute unix timestamp, not a duration.
    #[serde(default)]
    access_token_expire_in: i64,
}

pub async fn refresh_access_token(
    http: &Client,
    credential: &TikTokCredential,
    shop_id: &str,
    refresh_token: &str,
) -> Result<PlatformToken, TikTokError> {
    let response = send_with_retry(|| {
        http.get(format!("{}/api/v2/token/refresh", *AUTH_HOST)).query(&[
            ("app_key", credential.app_key.as_str()),
            ("app_secret", credential.app_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
    })
    .await
    .map_err(|err| TikTokError::Transport(err.to_string()))?;

    let status = response.status();
    let payload: RefreshEnvelope = response
        .json()
        .await
        .map_err(|err| TikTokError::Parse(format!("refresh response (HTTP {status}): {err}")))?;

    if payload.code != 0 {
        return Err(TikTokError::Auth(format!(
            "code {}: {}",
            payload.code, payload.message
        )));
    }
    let data = payload
        .data
        .ok_or_else(|| TikTokError::Parse("refresh response missing data".into()))?;
    if data.access_token.is_empty() {
        return Err(TikTokError::Parse("refresh response missing access_token".into()));
    }

    let expires_at = Utc
        .timestamp_opt(data.access_token_expire_in, 0)
        .single()
        .ok_or_else(|| {
            TikTokError::Parse(format!(
                "bad access_token_expire_in: {}",
                data.access_token_expire_in
            ))
        })?;

    Ok(PlatformToken {
        platform: Platform::Tiktok,
        shop_id: shop_id.to_string(),
        access_token: data.access_token,
        refresh_token: data.refresh_token,
        expires_at,
    })
}
