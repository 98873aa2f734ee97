//! Shopee catalog fetcher: item id pagination, batched base info and
//! per-item model lists, folded into canonical products.
//!
//! Containment: only auth failures abort the walk. A rate limit abandons
//! the remaining per-item calls, a post-retry transport error or business
//! error loses only the affected items; either way the items are emitted
//! marked incomplete instead of failing the cycle.

use super::{FETCH_DELAY_MS, HOST, ShopeeError, sign};
use crate::http::send_with_retry;
use crate::metrics;
use crate::models::{CanonicalProduct, CanonicalVariant, Platform, ShopeeCredential};
use crate::normalize::{self, shopee_paths};
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::warn;

const ITEM_LIST_PATH: &str = "/api/v2/product/get_item_list";
const BASE_INFO_PATH: &str = "/api/v2/product/get_item_base_info";
const MODEL_LIST_PATH: &str = "/api/v2/product/get_model_list";

const PAGE_SIZE: usize = 100;
const BASE_INFO_CHUNK: usize = 50;
const MAX_PAGES: usize = 100;

pub struct ShopeeClient {
    http: Client,
    credential: ShopeeCredential,
    shop_id: i64,
    access_token: String,
}

/// What a per-item failure does to the rest of the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchAction {
    /// Auth is shop-level: stop and surface the error.
    Abort,
    /// Rate limited: keep the items, make no further per-item calls.
    Abandon,
    /// Lose only the affected items, keep walking.
    SkipItem,
}

fn failure_action(err: &ShopeeError) -> FetchAction {
    match err {
        ShopeeError::Auth(_) => FetchAction::Abort,
        ShopeeError::RateLimited => FetchAction::Abandon,
        ShopeeError::Transport(_) | ShopeeError::Platform { .. } | ShopeeError::Parse(_) => {
            FetchAction::SkipItem
        }
    }
}

fn http_error(status: StatusCode, body: String) -> ShopeeError {
    ShopeeError::Platform {
        error: format!("http_{}", status.as_u16()),
        message: body,
    }
}

/// Unwraps the `{error, message, response}` envelope of a successful
/// response; a non-empty `error` string is a business (or auth) error.
fn unwrap_envelope(path: &str, payload: Value) -> Result<Value, ShopeeError> {
    let error = payload.get("error").and_then(Value::as_str).unwrap_or("");
    if !error.is_empty() {
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        warn!(target: "agni.shopee", path, error, %message, raw = %payload, "shopee business error");
        if error.contains("auth") || error.contains("token") {
            return Err(ShopeeError::Auth(format!("{error}: {message}")));
        }
        return Err(ShopeeError::Platform {
            error: error.to_string(),
            message,
        });
    }
    Ok(payload.get("response").cloned().unwrap_or(Value::Null))
}

impl ShopeeClient {
    pub fn new(http: Client, credential: ShopeeCredential, shop_id: i64, access_token: String) -> Self {
        Self {
            http,
            credential,
            shop_id,
            access_token,
        }
    }

    /// Signed GET against a shop-level endpoint. The envelope is only
    /// consulted on an HTTP success; any other status is an error even when
    /// the body happens to parse.
    async fn signed_get(&self, path: &str, extra: &[(&str, String)]) -> Result<Value, ShopeeError> {
        let started = Instant::now();
        let response = send_with_retry(|| {
            let timestamp = Utc::now().timestamp();
            let sig = sign::shop_sign(
                &self.credential.partner_key,
                self.credential.partner_id,
                path,
                timestamp,
                &self.access_token,
                self.shop_id,
            );
            let mut query: Vec<(&str, String)> = vec![
                ("partner_id", self.credential.partner_id.to_string()),
                ("timestamp", timestamp.to_string()),
                ("access_token", self.access_token.clone()),
                ("shop_id", self.shop_id.to_string()),
                ("sign", sig),
            ];
            query.extend(extra.iter().cloned());
            self.http.get(format!("{}{}", *HOST, path)).query(&query)
        })
        .await
        .map_err(|err| ShopeeError::Transport(err.to_string()))?;
        metrics::platform_call("shopee", path, started.elapsed().as_millis());

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ShopeeError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(target: "agni.shopee", path, status = status.as_u16(), %body, "shopee http error");
            return Err(http_error(status, body));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|err| ShopeeError::Parse(format!("{path} (HTTP {status}): {err}")))?;
        unwrap_envelope(path, payload)
    }

    async fn item_ids(&self) -> Result<Vec<i64>, ShopeeError> {
        let mut ids = Vec::new();
        let mut offset: i64 = 0;
        for _ in 0..MAX_PAGES {
            let page = self
                .signed_get(
                    ITEM_LIST_PATH,
                    &[
                        ("offset", offset.to_string()),
                        ("page_size", PAGE_SIZE.to_string()),
                        ("item_status", "NORMAL".to_string()),
                    ],
                )
                .await?;
            if let Some(items) = page.get("item").and_then(Value::as_array) {
                ids.extend(
                    items
                        .iter()
                        .filter_map(|item| item.get("item_id").and_then(Value::as_i64)),
                );
            }
            if !page
                .get("has_next_page")
                .and_then(Value::as_bool)
                .unwrap_or(false)
            {
                break;
            }
            offset = page.get("next_offset").and_then(Value::as_i64).unwrap_or(0);
        }
        Ok(ids)
    }

    async fn base_info(&self, ids: &[i64]) -> Result<Vec<Value>, ShopeeError> {
        let joined = ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let page = self
            .signed_get(BASE_INFO_PATH, &[("item_id_list", joined)])
            .await?;
        Ok(page
            .get("item_list")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn model_list(&self, item_id: i64) -> Result<Vec<Value>, ShopeeError> {
        let page = self
            .signed_get(MODEL_LIST_PATH, &[("item_id", item_id.to_string())])
            .await?;
        Ok(page
            .get("model")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn fetch_catalog(&self) -> Result<Vec<CanonicalProduct>, ShopeeError> {
        let ids = self.item_ids().await?;

        let mut raw_items: Vec<Value> = Vec::with_capacity(ids.len());
        let mut failed_ids: HashSet<i64> = HashSet::new();
        let mut abandoned = false;
        for chunk in ids.chunks(BASE_INFO_CHUNK) {
            if abandoned {
                failed_ids.extend(chunk);
                raw_items.extend(chunk.iter().map(|id| json!({ "item_id": id })));
                continue;
            }
            match self.base_info(chunk).await {
                Ok(batch) => raw_items.extend(batch),
                Err(err) => match failure_action(&err) {
                    FetchAction::Abort => return Err(err),
                    FetchAction::Abandon => {
                        warn!(target: "agni.shopee", ?chunk, "rate limited, abandoning remaining base info calls");
                        abandoned = true;
                        failed_ids.extend(chunk);
                        raw_items.extend(chunk.iter().map(|id| json!({ "item_id": id })));
                    }
                    FetchAction::SkipItem => {
                        warn!(target: "agni.shopee", ?chunk, %err, "base info chunk failed, items marked incomplete");
                        failed_ids.extend(chunk);
                        raw_items.extend(chunk.iter().map(|id| json!({ "item_id": id })));
                    }
                },
            }
        }

        let mut products = Vec::with_capacity(raw_items.len());
        for raw in &raw_items {
            let item_id = normalize::resolve_i64(raw, &[&[normalize::Seg::Key("item_id")]]);
            if abandoned || failed_ids.contains(&item_id) {
                products.push(normalize::shopee_product(raw, Vec::new(), false));
                continue;
            }
            tokio::time::sleep(Duration::from_millis(*FETCH_DELAY_MS)).await;
            match self.model_list(item_id).await {
                Ok(models) => {
                    let variants = if models.is_empty() {
                        vec![single_variant(item_id, raw)]
                    } else {
                        models
                            .iter()
                            .map(|model| normalize::shopee_variant(item_id, model))
                            .collect()
                    };
                    products.push(normalize::shopee_product(raw, variants, true));
                }
                Err(err) => match failure_action(&err) {
                    FetchAction::Abort => return Err(err),
                    FetchAction::Abandon => {
                        warn!(target: "agni.shopee", item_id, "rate limited, abandoning remaining model lookups");
                        abandoned = true;
                        products.push(normalize::shopee_product(raw, Vec::new(), false));
                    }
                    FetchAction::SkipItem => {
                        warn!(target: "agni.shopee", item_id, %err, "model list failed, item marked incomplete");
                        products.push(normalize::shopee_product(raw, Vec::new(), false));
                    }
                },
            }
        }
        Ok(products)
    }
}

/// Items without models are carried as one pseudo-variant with model id 0
/// so they still get a stable internal SKU.
fn single_variant(item_id: i64, raw: &Value) -> CanonicalVariant {
    CanonicalVariant {
        platform: Platform::Shopee,
        external_item_id: item_id.to_string(),
        external_variant_id: "0".to_string(),
        sku: normalize::resolve_str(raw, shopee_paths::ITEM_SKU),
        name: "Default Variant".to_string(),
        price: normalize::shopee_display_price(normalize::resolve_i64(raw, shopee_paths::ITEM_PRICE_MIN)),
        stock: normalize::resolve_i64(raw, shopee_paths::ITEM_STOCK),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_auth_failures_abort_the_walk() {
        assert_eq!(
            failure_action(&ShopeeError::Auth("token expired".into())),
            FetchAction::Abort
        );
        assert_eq!(
            failure_action(&ShopeeError::RateLimited),
            FetchAction::Abandon
        );
        assert_eq!(
            failure_action(&ShopeeError::Transport("timed out".into())),
            FetchAction::SkipItem
        );
        assert_eq!(
            failure_action(&ShopeeError::Platform {
                error: "error_server".into(),
                message: String::new(),
            }),
            FetchAction::SkipItem
        );
    }

    #[test]
    fn non_success_status_is_an_error_even_with_clean_body() {
        // a 503 whose body parses as `{}` must not read as an empty catalog
        let err = http_error(StatusCode::SERVICE_UNAVAILABLE, "{}".to_string());
        assert!(matches!(&err, ShopeeError::Platform { error, .. } if error == "http_503"));
        assert_eq!(failure_action(&err), FetchAction::SkipItem);
    }

    #[test]
    fn envelope_error_field_classification() {
        let ok = unwrap_envelope(
            BASE_INFO_PATH,
            serde_json::json!({"error": "", "response": {"item_list": []}}),
        );
        assert!(ok.is_ok_and(|v| v.get("item_list").is_some()));

        let auth = unwrap_envelope(
            BASE_INFO_PATH,
            serde_json::json!({"error": "error_auth", "message": "invalid access_token"}),
        );
        assert!(matches!(auth, Err(ShopeeError::Auth(_))));

        let business = unwrap_envelope(
            BASE_INFO_PATH,
            serde_json::json!({"error": "error_param", "message": "bad item_id_list"}),
        );
        assert!(matches!(business, Err(ShopeeError::Platform { .. })));
    }
}
