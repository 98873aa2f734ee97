//! Supabase-backed persistence via PostgREST. Tables:
//! `platform_config`, `shopee_tokens`, `tiktok_tokens`, `stock_master`,
//! `sku_mapping`.

use crate::http::build_client;
use crate::models::{
    Platform, PlatformToken, ShopeeCredential, SkuMapping, StockMasterRow, StockUpsertRow,
    TikTokCredential, TikTokShopContext,
};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Store {
    base_url: String,
    service_key: String,
    http: Client,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
    #[error("missing configuration: {0}")]
    Missing(String),
}

#[derive(Debug, Deserialize)]
struct TokenRow {
    shop_id: String,
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ConfigRow {
    value: serde_json::Value,
}

impl Store {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            http: build_client(),
        })
    }

    fn get(&self, path_and_query: &str) -> reqwest::RequestBuilder {
        self.authed(self.http.get(self.rest(path_and_query)))
    }

    fn rest(&self, path_and_query: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path_and_query)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn rows<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<Vec<T>, StoreError> {
        let response = builder
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Request(format!("HTTP {status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))
    }

    async fn expect_success(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<(), StoreError> {
        let response = builder
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Request(format!("HTTP {status}: {body}")));
        }
        Ok(())
    }

    async fn config_value<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<T, StoreError> {
        let mut rows: Vec<ConfigRow> = self
            .rows(self.get(&format!(
                "platform_config?key=eq.{}&select=value&limit=1",
                urlencoding::encode(key)
            )))
            .await?;
        let row = rows
            .pop()
            .ok_or_else(|| StoreError::Missing(format!("platform_config key '{key}'")))?;
        serde_json::from_value(row.value)
            .map_err(|err| StoreError::Deserialize(format!("platform_config '{key}': {err}")))
    }

    pub async fn shopee_credential(&self) -> Result<ShopeeCredential, StoreError> {
        self.config_value("shopee_credential").await
    }

    pub async fn tiktok_credential(&self) -> Result<TikTokCredential, StoreError> {
        self.config_value("tiktok_credential").await
    }

    pub async fn tiktok_shop_context(&self) -> Result<TikTokShopContext, StoreError> {
        self.config_value("tiktok_shop").await
    }

    fn token_table(platform: Platform) -> &'static str {
        match platform {
            Platform::Shopee => "shopee_tokens",
            Platform::Tiktok => "tiktok_tokens",
        }
    }

    /// Most recently issued token wins; refresh appends, never updates.
    pub async fn latest_token(
        &self,
        platform: Platform,
        shop_id: &str,
    ) -> Result<Option<PlatformToken>, StoreError> {
        let mut rows: Vec<TokenRow> = self
            .rows(self.get(&format!(
                "{}?shop_id=eq.{}&select=shop_id,access_token,refresh_token,expires_at&order=created_at.desc&limit=1",
                Self::token_table(platform),
                urlencoding::encode(shop_id)
            )))
            .await?;
        Ok(rows.pop().map(|row| PlatformToken {
            platform,
            shop_id: row.shop_id,
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            expires_at: row.expires_at,
        }))
    }

    pub async fn insert_token(&self, token: &PlatformToken) -> Result<(), StoreError> {
        let body = json!({
            "shop_id": token.shop_id,
            "access_token": token.access_token,
            "refresh_token": token.refresh_token,
            "expires_at": token.expires_at,
        });
        self.expect_success(
            self.authed(self.http.post(self.rest(Self::token_table(token.platform))))
                .header("Prefer", "return=minimal")
                .json(&body),
        )
        .await
    }

    pub async fn stock_master(&self) -> Result<Vec<StockMasterRow>, StoreError> {
        self.rows(self.get("stock_master?select=*&order=product_name.asc,variant_name.asc"))
            .await
    }

    pub async fn upsert_stock_rows(&self, rows: &[StockUpsertRow]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        self.expect_success(
            self.authed(
                self.http
                    .post(self.rest("stock_master?on_conflict=internal_sku")),
            )
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows),
        )
        .await
    }

    pub async fn touch_stock_row(
        &self,
        internal_sku: &str,
        stock_qty: i64,
    ) -> Result<(), StoreError> {
        let body = json!({ "stock_qty": stock_qty, "updated_at": Utc::now() });
        self.expect_success(
            self.authed(self.http.patch(self.rest(&format!(
                "stock_master?internal_sku=eq.{}",
                urlencoding::encode(internal_sku)
            ))))
            .header("Prefer", "return=minimal")
            .json(&body),
        )
        .await
    }

    pub async fn mappings(&self) -> Result<Vec<SkuMapping>, StoreError> {
        self.rows(self.get("sku_mapping?select=*")).await
    }

    /// Records an exact name match: upserts the mapping by natural key and
    /// mirrors the ids onto the stock master row. This is the only place a
    /// mapping row is created; sync writes never invent one.
    pub async fn link_tiktok(
        &self,
        internal_sku: &str,
        tiktok_product_id: &str,
        tiktok_sku: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let body = json!({
            "internal_sku": internal_sku,
            "tiktok_product_id": tiktok_product_id,
            "tiktok_sku": tiktok_sku,
            "updated_at": now,
        });
        self.expect_success(
            self.authed(
                self.http
                    .post(self.rest("sku_mapping?on_conflict=internal_sku")),
            )
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&body),
        )
        .await?;

        let patch = json!({
            "tiktok_product_id": tiktok_product_id,
            "tiktok_sku": tiktok_sku,
            "updated_at": now,
        });
        self.expect_success(
            self.authed(self.http.patch(self.rest(&format!(
                "stock_master?internal_sku=eq.{}",
                urlencoding::encode(internal_sku)
            ))))
            .header("Prefer", "return=minimal")
            .json(&patch),
        )
        .await
    }
}
