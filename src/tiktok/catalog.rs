//! TikTok Shop catalog fetcher: paginated product search plus per-product
//! detail, folded into canonical products.

use super::{API_HOST, FETCH_DELAY_MS, TikTokError, sign};
use crate::http::send_with_retry;
use crate::metrics;
use crate::models::{CanonicalProduct, TikTokCredential, TikTokShopContext};
use crate::normalize;
use chrono::Utc;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tracing::warn;

const SEARCH_PATH: &str = "/product/202309/products/search";
const PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 100;

pub struct TikTokClient {
    http: Client,
    credential: TikTokCredential,
    shop: TikTokShopContext,
    access_token: String,
}

enum Method {
    Get,
    Post(Value),
}

impl TikTokClient {
    pub fn new(
        http: Client,
        credential: TikTokCredential,
        shop: TikTokShopContext,
        access_token: String,
    ) -> Self {
        Self {
            http,
            credential,
            shop,
            access_token,
        }
    }

    pub fn warehouse_id(&self) -> &str {
        &self.shop.warehouse_id
    }

    /// Signed call; unwraps the `{code, message, data}` envelope, where any
    /// non-zero code is a business error.
    async fn call(
        &self,
        path: &str,
        extra: &[(&str, String)],
        method: Method,
    ) -> Result<Value, TikTokError> {
        let body_bytes = match &method {
            Method::Get => Vec::new(),
            Method::Post(body) => serde_json::to_vec(body)
                .map_err(|err| TikTokError::Parse(format!("request body: {err}")))?,
        };

        let started = Instant::now();
        let response = send_with_retry(|| {
            let mut query: Vec<(String, String)> = vec![
                ("app_key".to_string(), self.credential.app_key.clone()),
                ("timestamp".to_string(), Utc::now().timestamp().to_string()),
                ("shop_cipher".to_string(), self.shop.cipher.clone()),
            ];
            for (k, v) in extra {
                query.push((k.to_string(), v.clone()));
            }
            let sig = sign::sign_request(
                &self.credential.app_secret,
                path,
                &query,
                "application/json",
                &body_bytes,
            );
            query.push(("sign".to_string(), sig));

            let url = format!("{}{}", *API_HOST, path);
            let builder = match &method {
                Method::Get => self.http.get(url),
                Method::Post(_) => self
                    .http
                    .post(url)
                    .header("Content-Type", "application/json")
                    .body(body_bytes.clone()),
            };
            builder
                .header("x-tts-access-token", &self.access_token)
                .query(&query)
        })
        .await
        .map_err(|err| TikTokError::Transport(err.to_string()))?;
        metrics::platform_call("tiktok", path, started.elapsed().as_millis());

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(TikTokError::RateLimited);
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(TikTokError::Auth(format!("HTTP {status}: {body}")));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|err| TikTokError::Parse(format!("{path} (HTTP {status}): {err}")))?;

        let code = payload.get("code").and_then(Value::as_i64).unwrap_or(-1);
        if code != 0 {
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            warn!(target: "agni.tiktok", path, code, %message, raw = %payload, "tiktok business error");
            return Err(TikTokError::Platform { code, message });
        }
        Ok(payload.get("data").cloned().unwrap_or(Value::Null))
    }

    async fn product_ids(&self) -> Result<Vec<String>, TikTokError> {
        let mut ids = Vec::new();
        let mut page_token = String::new();
        for _ in 0..MAX_PAGES {
            let mut extra = vec![("page_size", PAGE_SIZE.to_string())];
            if !page_token.is_empty() {
                extra.push(("page_token", page_token.clone()));
            }
            let data = self
                .call(SEARCH_PATH, &extra, Method::Post(json!({"status": "ALL"})))
                .await?;
            if let Some(products) = data.get("products").and_then(Value::as_array) {
                ids.extend(products.iter().filter_map(|p| {
                    p.get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                }));
            }
            page_token = data
                .get("next_page_token")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            if page_token.is_empty() {
                break;
            }
        }
        Ok(ids)
    }

    async fn product_detail(&self, product_id: &str) -> Result<Value, TikTokError> {
        self.call(
            &format!("/product/202309/products/{product_id}"),
            &[],
            Method::Get,
        )
        .await
    }

    /// Full catalog walk. A failed detail lookup (transport included, after
    /// its one retry) drops only that product; a rate limit stops the walk
    /// with what was gathered so far. Only auth failures abort.
    pub async fn fetch_catalog(&self) -> Result<Vec<CanonicalProduct>, TikTokError> {
        let ids = self.product_ids().await?;
        let mut products = Vec::with_capacity(ids.len());
        for id in &ids {
            tokio::time::sleep(Duration::from_millis(*FETCH_DELAY_MS)).await;
            match self.product_detail(id).await {
                Ok(data) => products.push(normalize::tiktok_product(id, &data)),
                Err(err @ TikTokError::Auth(_)) => return Err(err),
                Err(TikTokError::RateLimited) => {
                    warn!(target: "agni.tiktok", product_id = %id, "rate limited, abandoning remaining detail lookups");
                    break;
                }
                Err(err) => {
                    warn!(target: "agni.tiktok", product_id = %id, %err, "product detail failed, skipping");
                }
            }
        }
        Ok(products)
    }
}

impl TikTokClient {
    pub(crate) async fn call_api(
        &self,
        path: &str,
        extra: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value, TikTokError> {
        match body {
            Some(b) => self.call(path, extra, Method::Post(b)).await,
            None => self.call(path, extra, Method::Get).await,
        }
    }
}
