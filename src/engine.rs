//! Cycle orchestration: reconciliation (Shopee -> stock master -> TikTok
//! comparison) and the stock sync write-out, with item-level error
//! containment and a hard per-cycle deadline.

use crate::models::{
    CycleResponse, FullCycleOutcome, LinkFailure, ReconciledRow, SkuMapping, StockMasterRow,
    StockUpsertRow, SyncOutcome, SyncReport, SyncResultStatus, SyncStatus, internal_sku,
    sanitize_sku_fragment,
};
use crate::reconcile;
use crate::shopee::{self, ShopeeError, catalog::ShopeeClient};
use crate::store::{Store, StoreError};
use crate::tiktok::{self, TikTokError, catalog::TikTokClient, inventory};
use crate::tokens::{TokenError, TokenManager};
use chrono::Utc;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Auth,
    Transport,
    Platform,
    Parse,
    Persistence,
}

#[derive(Debug, Error)]
#[error("{stage}: {message}")]
pub struct EngineError {
    stage: &'static str,
    message: String,
    kind: ErrorKind,
}

impl EngineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: ErrorKind::InvalidInput,
        }
    }

    fn shopee(stage: &'static str, err: ShopeeError) -> Self {
        let kind = match err {
            ShopeeError::Auth(_) => ErrorKind::Auth,
            ShopeeError::Transport(_) => ErrorKind::Transport,
            ShopeeError::Platform { .. } | ShopeeError::RateLimited => ErrorKind::Platform,
            ShopeeError::Parse(_) => ErrorKind::Parse,
        };
        Self {
            stage,
            message: err.to_string(),
            kind,
        }
    }

    fn tiktok(stage: &'static str, err: TikTokError) -> Self {
        let kind = match err {
            TikTokError::Auth(_) => ErrorKind::Auth,
            TikTokError::Transport(_) => ErrorKind::Transport,
            TikTokError::Platform { .. } | TikTokError::RateLimited => ErrorKind::Platform,
            TikTokError::Parse(_) => ErrorKind::Parse,
        };
        Self {
            stage,
            message: err.to_string(),
            kind,
        }
    }

    fn store(stage: &'static str, err: StoreError) -> Self {
        Self {
            stage,
            message: err.to_string(),
            kind: ErrorKind::Persistence,
        }
    }

    fn token(stage: &'static str, err: TokenError) -> Self {
        match err {
            TokenError::Shopee(inner) => Self::shopee(stage, inner),
            TokenError::Tiktok(inner) => Self::tiktok(stage, inner),
            TokenError::Store(inner) => Self::store(stage, inner),
            missing @ TokenError::Missing { .. } => Self {
                stage,
                message: missing.to_string(),
                kind: ErrorKind::Auth,
            },
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

/// Decision for one stock master row, separated from I/O so the
/// skip-without-network rule is directly testable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPlan {
    Skip(&'static str),
    Write {
        product_id: String,
        sku_id: String,
        quantity: i64,
    },
}

pub fn plan_sync(row: &StockMasterRow, mapping: Option<&SkuMapping>) -> SyncPlan {
    match mapping {
        None => SyncPlan::Skip("no mapping"),
        Some(m) if !m.is_complete() => SyncPlan::Skip("mapping incomplete"),
        Some(m) => SyncPlan::Write {
            product_id: m.tiktok_product_id.clone(),
            sku_id: m.tiktok_sku.clone(),
            quantity: row.stock_qty,
        },
    }
}

#[derive(Clone)]
pub struct SyncEngine {
    store: Store,
    tokens: Arc<TokenManager>,
    http: Client,
}

impl SyncEngine {
    pub fn new(store: Store, http: Client) -> Self {
        let tokens = Arc::new(TokenManager::new(store.clone(), http.clone()));
        Self {
            store,
            tokens,
            http,
        }
    }

    async fn shopee_client(&self) -> Result<ShopeeClient, EngineError> {
        let credential = match self.store.shopee_credential().await {
            Ok(c) => c,
            Err(StoreError::Missing(_)) => shopee::credential_from_env().ok_or_else(|| {
                EngineError::invalid_input("shopee_auth", "no shopee credential configured")
            })?,
            Err(err) => return Err(EngineError::store("shopee_auth", err)),
        };
        if credential.shop_id == 0 {
            return Err(EngineError::invalid_input(
                "shopee_auth",
                "shopee shop_id not configured",
            ));
        }
        let access_token = self
            .tokens
            .shopee_token(&credential, credential.shop_id)
            .await
            .map_err(|err| EngineError::token("shopee_auth", err))?;
        let shop_id = credential.shop_id;
        Ok(ShopeeClient::new(
            self.http.clone(),
            credential,
            shop_id,
            access_token,
        ))
    }

    async fn tiktok_client(&self) -> Result<TikTokClient, EngineError> {
        let credential = match self.store.tiktok_credential().await {
            Ok(c) => c,
            Err(StoreError::Missing(_)) => tiktok::credential_from_env().ok_or_else(|| {
                EngineError::invalid_input("tiktok_auth", "no tiktok credential configured")
            })?,
            Err(err) => return Err(EngineError::store("tiktok_auth", err)),
        };
        let shop = self
            .store
            .tiktok_shop_context()
            .await
            .map_err(|err| EngineError::store("tiktok_auth", err))?;
        if shop.warehouse_id.trim().is_empty() {
            return Err(EngineError::invalid_input(
                "tiktok_auth",
                "tiktok warehouse_id not configured",
            ));
        }
        let access_token = self
            .tokens
            .tiktok_token(&credential, &shop.shop_id)
            .await
            .map_err(|err| EngineError::token("tiktok_auth", err))?;
        Ok(TikTokClient::new(
            self.http.clone(),
            credential,
            shop,
            access_token,
        ))
    }

    /// Full reconciliation: pull the Shopee catalog, refresh the stock
    /// master, pull the TikTok catalog, link exact name matches, classify.
    pub async fn run_reconcile(&self) -> Result<CycleResponse, EngineError> {
        let started = Instant::now();

        let shopee = self.shopee_client().await?;
        let products = shopee
            .fetch_catalog()
            .await
            .map_err(|err| EngineError::shopee("shopee_fetch", err))?;

        let now = Utc::now();
        let mut upserts: Vec<StockUpsertRow> = Vec::new();
        let mut incomplete_items: Vec<String> = Vec::new();
        for product in &products {
            if !product.complete {
                incomplete_items.push(product.external_item_id.clone());
                continue;
            }
            for variant in &product.variants {
                let item_id = variant.external_item_id.parse::<i64>().unwrap_or(0);
                let model_id = variant.external_variant_id.parse::<i64>().unwrap_or(0);
                let shopee_sku = if variant.sku.trim().is_empty() {
                    sanitize_sku_fragment(&format!("{} {}", product.name, variant.name))
                } else {
                    variant.sku.clone()
                };
                upserts.push(StockUpsertRow {
                    internal_sku: internal_sku(item_id, model_id),
                    product_name: product.name.clone(),
                    variant_name: variant.name.clone(),
                    stock_qty: variant.stock,
                    shopee_item_id: variant.external_item_id.clone(),
                    shopee_model_id: variant.external_variant_id.clone(),
                    shopee_sku,
                    updated_at: now,
                });
            }
        }
        self.store
            .upsert_stock_rows(&upserts)
            .await
            .map_err(|err| EngineError::store("stock_master_upsert", err))?;

        let rows = self
            .store
            .stock_master()
            .await
            .map_err(|err| EngineError::store("stock_master_read", err))?;

        let tiktok = self.tiktok_client().await?;
        let tiktok_products = tiktok
            .fetch_catalog()
            .await
            .map_err(|err| EngineError::tiktok("tiktok_fetch", err))?;

        let (summary, items) = reconcile::reconcile(&rows, &tiktok_products);
        let link_failures = self.link_matches(&items, &tiktok_products).await;

        info!(
            target: "agni.engine",
            total = summary.total_all,
            matched = summary.total_match,
            variant_missing = summary.total_variant_missing,
            product_missing = summary.total_product_missing,
            incomplete = incomplete_items.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reconcile cycle complete"
        );

        Ok(CycleResponse {
            summary,
            items,
            incomplete_items,
            link_failures,
        })
    }

    /// Records the TikTok ids for rows whose product and variant names
    /// matched exactly. Link failures are reported in the cycle response;
    /// the next cycle retries them.
    async fn link_matches(
        &self,
        items: &[ReconciledRow],
        tiktok_products: &[crate::models::CanonicalProduct],
    ) -> Vec<LinkFailure> {
        let mut by_key: HashMap<(String, String), (&str, &str)> = HashMap::new();
        for product in tiktok_products {
            let pk = reconcile::key(&product.name);
            for variant in &product.variants {
                by_key.insert(
                    (pk.clone(), reconcile::key(&variant.name)),
                    (
                        variant.external_item_id.as_str(),
                        variant.external_variant_id.as_str(),
                    ),
                );
            }
        }
        let mut failures = Vec::new();
        for item in items {
            if item.status_tiktok != SyncStatus::Match {
                continue;
            }
            let lookup = (
                reconcile::key(&item.row.product_name),
                reconcile::key(&item.row.variant_name),
            );
            let Some((product_id, sku_id)) = by_key.get(&lookup) else {
                continue;
            };
            if item.row.tiktok_product_id == *product_id && item.row.tiktok_sku == *sku_id {
                continue;
            }
            if let Err(err) = self
                .store
                .link_tiktok(&item.row.internal_sku, product_id, sku_id)
                .await
            {
                warn!(
                    target: "agni.engine",
                    internal_sku = %item.row.internal_sku,
                    %err,
                    "failed to record tiktok link"
                );
                failures.push(LinkFailure {
                    internal_sku: item.row.internal_sku.clone(),
                    detail: err.to_string(),
                });
            }
        }
        failures
    }

    /// Push stock master quantities to TikTok, one write per linked row.
    /// Rows without a complete mapping are skipped without any network
    /// call; a missed deadline skips whatever remains.
    pub async fn run_sync(&self) -> Result<SyncReport, EngineError> {
        let deadline_secs = env_u64("CYCLE_DEADLINE_SECS", 300);
        let delay_ms = env_u64("SYNC_DELAY_MS", 500);
        let deadline = Instant::now() + Duration::from_secs(deadline_secs);

        let rows = self
            .store
            .stock_master()
            .await
            .map_err(|err| EngineError::store("stock_master_read", err))?;
        let mappings: HashMap<String, SkuMapping> = self
            .store
            .mappings()
            .await
            .map_err(|err| EngineError::store("mapping_read", err))?
            .into_iter()
            .map(|m| (m.internal_sku.clone(), m))
            .collect();

        let tiktok = self.tiktok_client().await?;

        let mut report = SyncReport::default();
        let mut abandon: Option<&'static str> = None;
        for row in &rows {
            if abandon.is_none() && Instant::now() >= deadline {
                abandon = Some("cycle deadline exceeded");
            }
            if let Some(reason) = abandon {
                report.push(SyncOutcome {
                    internal_sku: row.internal_sku.clone(),
                    status: SyncResultStatus::Skipped,
                    detail: Some(reason.to_string()),
                });
                continue;
            }
            match plan_sync(row, mappings.get(&row.internal_sku)) {
                SyncPlan::Skip(reason) => {
                    report.push(SyncOutcome {
                        internal_sku: row.internal_sku.clone(),
                        status: SyncResultStatus::Skipped,
                        detail: Some(reason.to_string()),
                    });
                }
                SyncPlan::Write {
                    product_id,
                    sku_id,
                    quantity,
                } => {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    match inventory::update_stock(&tiktok, &product_id, &sku_id, quantity).await {
                        Ok(()) => {
                            let touch =
                                self.store.touch_stock_row(&row.internal_sku, quantity).await;
                            if let Err(err) = &touch {
                                warn!(
                                    target: "agni.engine",
                                    internal_sku = %row.internal_sku,
                                    %err,
                                    "stock row touch failed after successful write"
                                );
                            }
                            report.push(written_outcome(&row.internal_sku, touch));
                        }
                        Err(err @ TikTokError::Auth(_)) => {
                            return Err(EngineError::tiktok("tiktok_sync", err));
                        }
                        Err(TikTokError::RateLimited) => {
                            warn!(target: "agni.engine", "rate limited during sync, abandoning remaining writes");
                            report.push(SyncOutcome {
                                internal_sku: row.internal_sku.clone(),
                                status: SyncResultStatus::Skipped,
                                detail: Some("rate limited".to_string()),
                            });
                            abandon = Some("rate limited");
                        }
                        Err(err) => {
                            warn!(
                                target: "agni.engine",
                                internal_sku = %row.internal_sku,
                                %err,
                                "stock write failed"
                            );
                            report.push(SyncOutcome {
                                internal_sku: row.internal_sku.clone(),
                                status: SyncResultStatus::Failed,
                                detail: Some(err.to_string()),
                            });
                        }
                    }
                }
            }
        }

        info!(
            target: "agni.engine",
            success = report.success_count,
            failed = report.failed_count,
            skipped = report.skipped_count,
            "sync cycle complete"
        );
        Ok(report)
    }

    pub async fn run_full_cycle(&self) -> Result<FullCycleOutcome, EngineError> {
        let reconcile = self.run_reconcile().await?;
        let sync = self.run_sync().await?;
        Ok(FullCycleOutcome { reconcile, sync })
    }
}

/// Outcome for a row whose platform write succeeded. A failed ledger touch
/// keeps the OK status (TikTok now holds the quantity) but carries the
/// store failure in the row's detail instead of dropping it.
fn written_outcome(internal_sku: &str, touch: Result<(), StoreError>) -> SyncOutcome {
    SyncOutcome {
        internal_sku: internal_sku.to_string(),
        status: SyncResultStatus::Ok,
        detail: touch
            .err()
            .map(|err| format!("stock row touch failed: {err}")),
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(stock: i64) -> StockMasterRow {
        StockMasterRow {
            internal_sku: "INT-77-901".into(),
            product_name: "Kaos Polo".into(),
            variant_name: "Merah".into(),
            stock_qty: stock,
            shopee_item_id: "77".into(),
            shopee_model_id: "901".into(),
            shopee_sku: "KP-M".into(),
            tiktok_product_id: String::new(),
            tiktok_sku: String::new(),
            updated_at: Utc::now(),
        }
    }

    fn mapping(product_id: &str, sku_id: &str) -> SkuMapping {
        SkuMapping {
            internal_sku: "INT-77-901".into(),
            tiktok_sku: sku_id.into(),
            tiktok_product_id: product_id.into(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn unmapped_row_is_skipped_without_network() {
        assert_eq!(plan_sync(&row(5), None), SyncPlan::Skip("no mapping"));
    }

    #[test]
    fn incomplete_mapping_is_skipped() {
        let m = mapping("7350", "");
        assert_eq!(
            plan_sync(&row(5), Some(&m)),
            SyncPlan::Skip("mapping incomplete")
        );
        let m = mapping("", "111");
        assert_eq!(
            plan_sync(&row(5), Some(&m)),
            SyncPlan::Skip("mapping incomplete")
        );
    }

    #[test]
    fn complete_mapping_writes_master_quantity() {
        let m = mapping("7350", "111");
        assert_eq!(
            plan_sync(&row(14), Some(&m)),
            SyncPlan::Write {
                product_id: "7350".into(),
                sku_id: "111".into(),
                quantity: 14,
            }
        );
    }

    #[test]
    fn touch_failure_is_carried_in_the_row_outcome() {
        let outcome = written_outcome(
            "INT-77-901",
            Err(StoreError::Request("HTTP 503: upstream".into())),
        );
        assert_eq!(outcome.status, SyncResultStatus::Ok);
        let detail = outcome.detail.as_deref().unwrap_or_default();
        assert!(detail.contains("touch failed"));
        assert!(detail.contains("HTTP 503"));

        let clean = written_outcome("INT-77-901", Ok(()));
        assert_eq!(clean.detail, None);
    }

    #[test]
    fn link_failures_survive_response_serialization() {
        let response = CycleResponse {
            summary: Default::default(),
            items: Vec::new(),
            incomplete_items: Vec::new(),
            link_failures: vec![LinkFailure {
                internal_sku: "INT-77-901".into(),
                detail: "HTTP 500: conflict".into(),
            }],
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["link_failures"][0]["internal_sku"], "INT-77-901");
        let back: CycleResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back.link_failures.len(), 1);
    }

    #[test]
    fn zero_stock_is_still_written() {
        let m = mapping("7350", "111");
        assert!(matches!(
            plan_sync(&row(0), Some(&m)),
            SyncPlan::Write { quantity: 0, .. }
        ));
    }
}
