use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two marketplaces whose catalogs are reconciled. Shopee is the system
/// of record for stock; TikTok Shop is the sync target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Shopee,
    Tiktok,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Shopee => "shopee",
            Platform::Tiktok => "tiktok",
        }
    }
}

/// Normalized, platform-agnostic product snapshot. Refreshed on every fetch
/// cycle; never kept as history.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalProduct {
    pub platform: Platform,
    pub external_item_id: String,
    pub name: String,
    pub description: String,
    pub category_id: i64,
    pub price_min: i64,
    pub price_max: i64,
    pub stock: i64,
    pub status: String,
    pub updated_at: DateTime<Utc>,
    pub variants: Vec<CanonicalVariant>,
    /// False when the variant fetch for this item was abandoned (rate limit
    /// or business error); the item is reported, not silently dropped.
    pub complete: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CanonicalVariant {
    pub platform: Platform,
    pub external_item_id: String,
    pub external_variant_id: String,
    pub sku: String,
    pub name: String,
    pub price: i64,
    pub stock: i64,
}

/// One row of the internal inventory ledger (table `stock_master`). The
/// internal SKU is the stable identifier unifying a Shopee variant with its
/// TikTok counterpart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMasterRow {
    pub internal_sku: String,
    pub product_name: String,
    pub variant_name: String,
    pub stock_qty: i64,
    #[serde(default)]
    pub shopee_item_id: String,
    #[serde(default)]
    pub shopee_model_id: String,
    #[serde(default)]
    pub shopee_sku: String,
    #[serde(default)]
    pub tiktok_product_id: String,
    #[serde(default)]
    pub tiktok_sku: String,
    pub updated_at: DateTime<Utc>,
}

/// Shopee-side subset of a stock master row. Reconcile upserts carry only
/// these columns so a merge never clears the TikTok link columns managed
/// by the linking step.
#[derive(Debug, Clone, Serialize)]
pub struct StockUpsertRow {
    pub internal_sku: String,
    pub product_name: String,
    pub variant_name: String,
    pub stock_qty: i64,
    pub shopee_item_id: String,
    pub shopee_model_id: String,
    pub shopee_sku: String,
    pub updated_at: DateTime<Utc>,
}

/// Cross-platform link for a single internal SKU (table `sku_mapping`).
/// Absence of a row means "not yet linked" and is never synthesized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkuMapping {
    pub internal_sku: String,
    pub tiktok_sku: String,
    pub tiktok_product_id: String,
    pub updated_at: DateTime<Utc>,
}

impl SkuMapping {
    /// A mapping only authorizes a write when both target identifiers are
    /// present.
    pub fn is_complete(&self) -> bool {
        !self.tiktok_sku.trim().is_empty() && !self.tiktok_product_id.trim().is_empty()
    }
}

/// Stable internal SKU, derived from immutable Shopee identifiers only.
/// Display names change; item and model ids do not.
pub fn internal_sku(item_id: i64, model_id: i64) -> String {
    format!("INT-{item_id}-{model_id}")
}

/// Short, safe fragment for the human-readable `shopee_sku` column. Keeps
/// A-Z, 0-9, `-` and `_`; separators collapse to `-`; capped at 30 chars.
pub fn sanitize_sku_fragment(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let mut out = String::with_capacity(upper.len());
    for ch in upper.chars() {
        match ch {
            'A'..='Z' | '0'..='9' | '-' | '_' => out.push(ch),
            ' ' | '/' | '\\' | ',' => out.push('-'),
            _ => {}
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        return "X".to_string();
    }
    trimmed.chars().take(30).collect()
}

/// OAuth-style token pair for one (platform, shop). Rows are appended on
/// refresh and superseded by recency, never deleted.
#[derive(Debug, Clone)]
pub struct PlatformToken {
    pub platform: Platform,
    pub shop_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl PlatformToken {
    pub fn is_fresh(&self, now: DateTime<Utc>, safety: chrono::Duration) -> bool {
        now < self.expires_at - safety
    }
}

/// Shopee partner credential (immutable platform config).
#[derive(Debug, Clone, Deserialize)]
pub struct ShopeeCredential {
    pub partner_id: i64,
    pub partner_key: String,
    #[serde(default)]
    pub shop_id: i64,
}

/// TikTok app credential (immutable platform config).
#[derive(Debug, Clone, Deserialize)]
pub struct TikTokCredential {
    pub app_key: String,
    pub app_secret: String,
}

/// Per-shop TikTok context required by catalog reads and inventory writes.
#[derive(Debug, Clone, Deserialize)]
pub struct TikTokShopContext {
    pub shop_id: String,
    pub cipher: String,
    pub warehouse_id: String,
}

/// Classification of an internal row against the TikTok catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Match,
    VariantMissing,
    ProductMissing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciledRow {
    #[serde(flatten)]
    pub row: StockMasterRow,
    pub status_tiktok: SyncStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub total_match: usize,
    pub total_variant_missing: usize,
    pub total_product_missing: usize,
    pub total_all: usize,
}

/// A store write that failed while recording an exact-name match. Reported
/// in the cycle response; the next cycle retries the link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkFailure {
    pub internal_sku: String,
    pub detail: String,
}

/// Body returned by the reconcile trigger endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResponse {
    pub summary: ReconcileSummary,
    pub items: Vec<ReconciledRow>,
    /// Shopee items whose variant fetch was abandoned this cycle.
    pub incomplete_items: Vec<String>,
    /// Exact-match links that could not be persisted this cycle.
    #[serde(default)]
    pub link_failures: Vec<LinkFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncResultStatus {
    Ok,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub internal_sku: String,
    pub status: SyncResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub results: Vec<SyncOutcome>,
}

impl SyncReport {
    pub fn push(&mut self, outcome: SyncOutcome) {
        match outcome.status {
            SyncResultStatus::Ok => self.success_count += 1,
            SyncResultStatus::Failed => self.failed_count += 1,
            SyncResultStatus::Skipped => self.skipped_count += 1,
        }
        self.results.push(outcome);
    }
}

/// Reconcile + write pass, as run by the background job queue.
#[derive(Debug, Clone, Serialize)]
pub struct FullCycleOutcome {
    pub reconcile: CycleResponse,
    pub sync: SyncReport,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_sku_uses_immutable_ids() {
        assert_eq!(internal_sku(843_291_001, 42), "INT-843291001-42");
        // renaming a variant must not move its internal SKU
        assert_eq!(internal_sku(843_291_001, 42), internal_sku(843_291_001, 42));
    }

    #[test]
    fn sanitize_sku_fragment_rules() {
        assert_eq!(sanitize_sku_fragment("  kaos polo, merah/XL "), "KAOS-POLO--MERAH-XL");
        assert_eq!(sanitize_sku_fragment("???"), "X");
        assert!(sanitize_sku_fragment(&"A".repeat(64)).len() <= 30);
    }

    #[test]
    fn mapping_completeness() {
        let mut mapping = SkuMapping {
            internal_sku: "INT-1-2".into(),
            tiktok_sku: "17290".into(),
            tiktok_product_id: "7350".into(),
            updated_at: Utc::now(),
        };
        assert!(mapping.is_complete());
        mapping.tiktok_sku.clear();
        assert!(!mapping.is_complete());
    }
}
