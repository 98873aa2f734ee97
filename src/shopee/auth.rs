//! Token refresh against the Shopee partner API.

use super::{HOST, ShopeeError, sign};
use crate::http::send_with_retry;
use crate::models::{Platform, PlatformToken, ShopeeCredential};
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

const REFRESH_PATH: &str = "/api/v2/auth/access_token/get";

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expire_in: i64,
}

/// Trades a refresh token for a new access token. A non-empty `error`
/// field means the refresh token is spent or revoked; the caller must
/// stop and wait for re-authorization.
pub async fn refresh_access_token(
    http: &Client,
    credential: &ShopeeCredential,
    shop_id: i64,
    refresh_token: &str,
) -> Result<PlatformToken, ShopeeError> {
    let body = json!({
        "partner_id": credential.partner_id,
        "shop_id": shop_id,
        "refresh_token": refresh_token,
    });

    let response = send_with_retry(|| {
        let timestamp = Utc::now().timestamp();
        let sign = sign::public_sign(
            &credential.partner_key,
            credential.partner_id,
            REFRESH_PATH,
            timestamp,
        );
        http.post(format!("{}{}", *HOST, REFRESH_PATH))
            .query(&[
                ("partner_id", credential.partner_id.to_string()),
                ("timestamp", timestamp.to_string()),
                ("sign", sign),
            ])
            .json(&body)
    })
    .await
    .map_err(|err| ShopeeError::Transport(err.to_string()))?;

    let status = response.status();
    let payload: RefreshResponse = response
        .json()
        .await
        .map_err(|err| ShopeeError::Parse(format!("refresh response (HTTP {status}): {err}")))?;

    if !payload.error.is_empty() {
        return Err(ShopeeError::Auth(format!(
            "{}: {}",
            payload.error, payload.message
        )));
    }
    if payload.access_token.is_empty() {
        return Err(ShopeeError::Parse("refresh response missing access_token".into()));
    }

    Ok(PlatformToken {
        platform: Platform::Shopee,
        shop_id: shop_id.to_string(),
        access_token: payload.access_token,
        refresh_token: payload.refresh_token,
        expires_at: Utc::now() + Duration::seconds(payload.expire_in),
    })
}
