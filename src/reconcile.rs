//! Pure comparison of the Shopee-sourced stock master against the TikTok
//! catalog. No I/O here: fetchers feed in canonical data, the engine takes
//! the classified rows out.

use crate::models::{
    CanonicalProduct, ReconcileSummary, ReconciledRow, StockMasterRow, SyncStatus,
};
use std::collections::HashSet;

/// Name-match key: product and variant names compare case- and
/// edge-whitespace-insensitively, interior whitespace preserved.
pub fn key(name: &str) -> String {
    name.trim().to_uppercase()
}

pub fn reconcile(
    rows: &[StockMasterRow],
    tiktok: &[CanonicalProduct],
) -> (ReconcileSummary, Vec<ReconciledRow>) {
    let mut product_keys: HashSet<String> = HashSet::new();
    let mut variant_keys: HashSet<(String, String)> = HashSet::new();
    for product in tiktok {
        let pk = key(&product.name);
        for variant in &product.variants {
            variant_keys.insert((pk.clone(), key(&variant.name)));
        }
        product_keys.insert(pk);
    }

    let mut classified: Vec<ReconciledRow> = rows
        .iter()
        .map(|row| {
            let pk = key(&row.product_name);
            let status = if variant_keys.contains(&(pk.clone(), key(&row.variant_name))) {
                SyncStatus::Match
            } else if product_keys.contains(&pk) {
                SyncStatus::VariantMissing
            } else {
                SyncStatus::ProductMissing
            };
            ReconciledRow {
                row: row.clone(),
                status_tiktok: status,
            }
        })
        .collect();

    // buckets first, then case-insensitively by name with a raw tiebreak
    classified.sort_by_cached_key(|item| {
        (
            item.status_tiktok,
            key(&item.row.product_name),
            key(&item.row.variant_name),
            item.row.product_name.clone(),
            item.row.variant_name.clone(),
        )
    });

    let mut summary = ReconcileSummary::default();
    for item in &classified {
        match item.status_tiktok {
            SyncStatus::Match => summary.total_match += 1,
            SyncStatus::VariantMissing => summary.total_variant_missing += 1,
            SyncStatus::ProductMissing => summary.total_product_missing += 1,
        }
        summary.total_all += 1;
    }

    (summary, classified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CanonicalVariant, Platform};
    use chrono::Utc;

    fn master_row(product: &str, variant: &str) -> StockMasterRow {
        StockMasterRow {
            internal_sku: format!("INT-1-{}", variant.len()),
            product_name: product.to_string(),
            variant_name: variant.to_string(),
            stock_qty: 10,
            shopee_item_id: "1".into(),
            shopee_model_id: "2".into(),
            shopee_sku: String::new(),
            tiktok_product_id: String::new(),
            tiktok_sku: String::new(),
            updated_at: Utc::now(),
        }
    }

    fn tiktok_product(name: &str, variants: &[&str]) -> CanonicalProduct {
        CanonicalProduct {
            platform: Platform::Tiktok,
            external_item_id: "7350".into(),
            name: name.to_string(),
            description: String::new(),
            category_id: 0,
            price_min: 0,
            price_max: 0,
            stock: 0,
            status: "ACTIVATE".into(),
            updated_at: Utc::now(),
            variants: variants
                .iter()
                .map(|v| CanonicalVariant {
                    platform: Platform::Tiktok,
                    external_item_id: "7350".into(),
                    external_variant_id: "111".into(),
                    sku: String::new(),
                    name: v.to_string(),
                    price: 0,
                    stock: 0,
                })
                .collect(),
            complete: true,
        }
    }

    #[test]
    fn classifies_all_three_buckets() {
        let rows = vec![
            master_row("Kaos Polo", "Merah"),
            master_row("Kaos Polo", "Ungu"),
            master_row("Celana Chino", "32"),
        ];
        let tiktok = vec![tiktok_product("kaos polo ", &["MERAH", "Biru"])];

        let (summary, items) = reconcile(&rows, &tiktok);
        assert_eq!(summary.total_match, 1);
        assert_eq!(summary.total_variant_missing, 1);
        assert_eq!(summary.total_product_missing, 1);
        assert_eq!(summary.total_all, 3);

        assert_eq!(items[0].status_tiktok, SyncStatus::Match);
        assert_eq!(items[0].row.variant_name, "Merah");
        assert_eq!(items[1].status_tiktok, SyncStatus::VariantMissing);
        assert_eq!(items[1].row.variant_name, "Ungu");
        assert_eq!(items[2].status_tiktok, SyncStatus::ProductMissing);
        assert_eq!(items[2].row.product_name, "Celana Chino");
    }

    #[test]
    fn key_is_trim_uppercase_and_idempotent() {
        assert_eq!(key("  Kaos Polo  "), key("KAOS POLO"));
        let once = key("  Kaos Polo  ");
        assert_eq!(key(&once), once);
    }

    #[test]
    fn matching_trims_and_ignores_case() {
        let rows = vec![master_row("  kaos POLO  ", "  merah ")];
        let tiktok = vec![tiktok_product("Kaos Polo", &["Merah"])];
        let (summary, _) = reconcile(&rows, &tiktok);
        assert_eq!(summary.total_match, 1);
    }

    #[test]
    fn interior_whitespace_is_significant() {
        let rows = vec![master_row("Kaos  Polo", "Merah")];
        let tiktok = vec![tiktok_product("Kaos Polo", &["Merah"])];
        let (summary, _) = reconcile(&rows, &tiktok);
        assert_eq!(summary.total_product_missing, 1);
    }

    #[test]
    fn buckets_sorted_by_name_within_status() {
        let rows = vec![
            master_row("Zebra Tee", "A"),
            master_row("Apple Tee", "B"),
        ];
        let (summary, items) = reconcile(&rows, &[]);
        assert_eq!(summary.total_product_missing, 2);
        assert_eq!(items[0].row.product_name, "Apple Tee");
        assert_eq!(items[1].row.product_name, "Zebra Tee");
    }

    #[test]
    fn within_bucket_ordering_ignores_case() {
        let rows = vec![
            master_row("Banana Tee", "A"),
            master_row("apple Tee", "B"),
            master_row("Cherry Tee", "C"),
        ];
        let (_, items) = reconcile(&rows, &[]);
        assert_eq!(items[0].row.product_name, "apple Tee");
        assert_eq!(items[1].row.product_name, "Banana Tee");
        assert_eq!(items[2].row.product_name, "Cherry Tee");
    }

    #[test]
    fn empty_tiktok_catalog_marks_everything_missing() {
        let rows = vec![master_row("Kaos Polo", "Merah")];
        let (summary, items) = reconcile(&rows, &[]);
        assert_eq!(summary.total_product_missing, 1);
        assert_eq!(summary.total_all, 1);
        assert_eq!(items.len(), 1);
    }
}
