//! Conversion of raw marketplace payloads into canonical records.
//!
//! Both platforms move fields around between API versions, so every
//! canonical field is resolved through an ordered list of candidate JSON
//! paths; the first non-null hit of the right shape wins. New response
//! shapes are handled by extending a path table, not by new branching.

use crate::models::{CanonicalProduct, CanonicalVariant, Platform};
use chrono::Utc;
use serde_json::Value;

#[derive(Debug, Clone, Copy)]
pub enum Seg {
    Key(&'static str),
    Idx(usize),
}

use Seg::{Idx, Key};

pub fn lookup<'a>(root: &'a Value, path: &[Seg]) -> Option<&'a Value> {
    let mut cur = root;
    for seg in path {
        cur = match seg {
            Key(k) => cur.get(k)?,
            Idx(i) => cur.get(i)?,
        };
    }
    if cur.is_null() { None } else { Some(cur) }
}

pub fn resolve<'a>(root: &'a Value, candidates: &[&[Seg]]) -> Option<&'a Value> {
    candidates.iter().find_map(|path| lookup(root, path))
}

/// Accepts native numbers, floats (truncated) and numeric strings with
/// thousands separators. Returns None for anything else.
pub fn parse_amount(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let cleaned = s.replace(',', "");
            let cleaned = cleaned.trim();
            if cleaned.is_empty() {
                return None;
            }
            cleaned
                .parse::<i64>()
                .ok()
                .or_else(|| cleaned.parse::<f64>().ok().map(|f| f.trunc() as i64))
        }
        _ => None,
    }
}

/// Total resolvers: unresolved fields fall back to zero/empty so every
/// canonical record is fully populated for downstream matching.
pub fn resolve_i64(root: &Value, candidates: &[&[Seg]]) -> i64 {
    candidates
        .iter()
        .find_map(|path| lookup(root, path).and_then(parse_amount))
        .unwrap_or(0)
}

pub fn resolve_str(root: &Value, candidates: &[&[Seg]]) -> String {
    resolve(root, candidates)
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default()
}

/// Shopee production price fields are documented micro-units: 1e5 per
/// display currency unit.
pub const SHOPEE_PRICE_SCALE: i64 = 100_000;

/// Sandbox payloads carry display-unit prices directly, so micro-unit
/// conversion only applies above the original threshold of ten scale units.
/// The rule is deliberately centralized here and expressed in terms of the
/// documented scale constant.
pub fn shopee_display_price(raw: i64) -> i64 {
    if raw.abs() > 10 * SHOPEE_PRICE_SCALE {
        raw / SHOPEE_PRICE_SCALE
    } else {
        raw
    }
}

pub mod shopee_paths {
    use super::Seg::{self, Idx, Key};

    pub const ITEM_NAME: &[&[Seg]] = &[&[Key("item_name")], &[Key("name")]];
    pub const ITEM_DESCRIPTION: &[&[Seg]] = &[&[Key("description")]];
    pub const ITEM_CATEGORY_ID: &[&[Seg]] = &[&[Key("category_id")]];
    pub const ITEM_SKU: &[&[Seg]] = &[&[Key("item_sku")]];
    pub const ITEM_STATUS: &[&[Seg]] = &[&[Key("item_status")], &[Key("status")]];
    pub const ITEM_PRICE_MIN: &[&[Seg]] = &[
        &[Key("price_min")],
        &[Key("price_info"), Key("current_price")],
        &[Key("price")],
    ];
    pub const ITEM_PRICE_MAX: &[&[Seg]] = &[
        &[Key("price_max")],
        &[Key("price_info"), Key("current_price")],
        &[Key("price_info"), Key("original_price")],
        &[Key("price")],
    ];
    pub const ITEM_STOCK: &[&[Seg]] = &[
        &[Key("stock_info_v2"), Key("summary_info"), Key("total_available_stock")],
        &[Key("stock_info"), Key("normal_stock")],
        &[Key("stock")],
    ];
    pub const MODEL_SKU: &[&[Seg]] = &[&[Key("model_sku")]];
    pub const MODEL_NAME: &[&[Seg]] = &[&[Key("model_name")], &[Key("name")]];
    pub const MODEL_ID: &[&[Seg]] = &[&[Key("model_id")]];
    pub const MODEL_PRICE: &[&[Seg]] = &[
        &[Key("price_info"), Idx(0), Key("current_price")],
        &[Key("price_info"), Key("current_price")],
        &[Key("price")],
    ];
    pub const MODEL_STOCK: &[&[Seg]] = &[
        &[Key("stock_info_v2"), Key("summary_info"), Key("total_available_stock")],
        &[Key("stock")],
    ];
}

pub mod tiktok_paths {
    use super::Seg::{self, Idx, Key};

    pub const PRODUCT_TITLE: &[&[Seg]] = &[&[Key("title")], &[Key("product_name")]];
    pub const PRODUCT_DESCRIPTION: &[&[Seg]] = &[&[Key("description")]];
    pub const PRODUCT_CATEGORY_ID: &[&[Seg]] = &[
        &[Key("category_chains"), Idx(0), Key("id")],
        &[Key("category_id")],
    ];
    pub const PRODUCT_STATUS: &[&[Seg]] = &[&[Key("status")]];
    pub const SKU_ID: &[&[Seg]] = &[&[Key("id")], &[Key("sku_id")]];
    pub const SKU_SELLER_SKU: &[&[Seg]] = &[&[Key("seller_sku")]];
    pub const SKU_PRICE: &[&[Seg]] = &[
        &[Key("price"), Key("sale_price")],
        &[Key("price"), Key("tax_exclusive_price")],
        &[Key("price")],
    ];
    pub const SKU_STOCK: &[&[Seg]] = &[
        &[Key("inventory"), Idx(0), Key("quantity")],
        &[Key("stock_infos"), Idx(0), Key("available_stock")],
        &[Key("stock")],
    ];
}

pub fn shopee_variant(item_id: i64, raw: &Value) -> CanonicalVariant {
    let model_id = resolve_i64(raw, shopee_paths::MODEL_ID);
    CanonicalVariant {
        platform: Platform::Shopee,
        external_item_id: item_id.to_string(),
        external_variant_id: model_id.to_string(),
        sku: resolve_str(raw, shopee_paths::MODEL_SKU),
        name: resolve_str(raw, shopee_paths::MODEL_NAME),
        price: shopee_display_price(resolve_i64(raw, shopee_paths::MODEL_PRICE)),
        stock: resolve_i64(raw, shopee_paths::MODEL_STOCK),
    }
}

pub fn shopee_product(raw: &Value, variants: Vec<CanonicalVariant>, complete: bool) -> CanonicalProduct {
    let item_id = resolve_i64(raw, &[&[Key("item_id")]]);
    CanonicalProduct {
        platform: Platform::Shopee,
        external_item_id: item_id.to_string(),
        name: resolve_str(raw, shopee_paths::ITEM_NAME),
        description: resolve_str(raw, shopee_paths::ITEM_DESCRIPTION),
        category_id: resolve_i64(raw, shopee_paths::ITEM_CATEGORY_ID),
        price_min: shopee_display_price(resolve_i64(raw, shopee_paths::ITEM_PRICE_MIN)),
        price_max: shopee_display_price(resolve_i64(raw, shopee_paths::ITEM_PRICE_MAX)),
        stock: resolve_i64(raw, shopee_paths::ITEM_STOCK),
        status: resolve_str(raw, shopee_paths::ITEM_STATUS),
        updated_at: Utc::now(),
        variants,
        complete,
    }
}

/// Variant display name for a TikTok SKU: the sales attribute values joined
/// with " / ", falling back through seller_sku, sku_name and name.
pub fn tiktok_variant_name(raw: &Value) -> String {
    if let Some(attrs) = raw.get("sales_attributes").and_then(Value::as_array) {
        let names: Vec<&str> = attrs
            .iter()
            .filter_map(|attr| {
                attr.get("value_name")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .or_else(|| {
                        attr.get("original_value_name")
                            .and_then(Value::as_str)
                            .filter(|s| !s.is_empty())
                    })
            })
            .collect();
        if !names.is_empty() {
            return names.join(" / ");
        }
    }
    for key in ["seller_sku", "sku_name", "name"] {
        if let Some(v) = raw.get(key).and_then(Value::as_str)
            && !v.is_empty()
        {
            return v.to_string();
        }
    }
    "Default Variant".to_string()
}

pub fn tiktok_variant(product_id: &str, raw: &Value) -> CanonicalVariant {
    CanonicalVariant {
        platform: Platform::Tiktok,
        external_item_id: product_id.to_string(),
        external_variant_id: resolve_str(raw, tiktok_paths::SKU_ID),
        sku: resolve_str(raw, tiktok_paths::SKU_SELLER_SKU),
        name: tiktok_variant_name(raw),
        price: resolve_i64(raw, tiktok_paths::SKU_PRICE),
        stock: resolve_i64(raw, tiktok_paths::SKU_STOCK),
    }
}

pub fn tiktok_product(product_id: &str, data: &Value) -> CanonicalProduct {
    let variants = data
        .get("skus")
        .and_then(Value::as_array)
        .map(|skus| skus.iter().map(|sku| tiktok_variant(product_id, sku)).collect())
        .unwrap_or_default();
    let prices: Vec<i64> = data
        .get("skus")
        .and_then(Value::as_array)
        .map(|skus| {
            skus.iter()
                .map(|sku| resolve_i64(sku, tiktok_paths::SKU_PRICE))
                .collect()
        })
        .unwrap_or_default();
    let stock: i64 = data
        .get("skus")
        .and_then(Value::as_array)
        .map(|skus| {
            skus.iter()
                .map(|sku| resolve_i64(sku, tiktok_paths::SKU_STOCK))
                .sum()
        })
        .unwrap_or(0);
    CanonicalProduct {
        platform: Platform::Tiktok,
        external_item_id: product_id.to_string(),
        name: resolve_str(data, tiktok_paths::PRODUCT_TITLE),
        description: resolve_str(data, tiktok_paths::PRODUCT_DESCRIPTION),
        category_id: resolve_i64(data, tiktok_paths::PRODUCT_CATEGORY_ID),
        price_min: prices.iter().copied().min().unwrap_or(0),
        price_max: prices.iter().copied().max().unwrap_or(0),
        stock,
        status: resolve_str(data, tiktok_paths::PRODUCT_STATUS),
        updated_at: Utc::now(),
        variants,
        complete: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_amount_formats() {
        assert_eq!(parse_amount(&json!(125000)), Some(125000));
        assert_eq!(parse_amount(&json!(125000.75)), Some(125000));
        assert_eq!(parse_amount(&json!("1,234,500")), Some(1_234_500));
        assert_eq!(parse_amount(&json!(" 99.9 ")), Some(99));
        assert_eq!(parse_amount(&json!("")), None);
        assert_eq!(parse_amount(&json!({"nested": 1})), None);
    }

    #[test]
    fn resolve_prefers_earlier_candidate() {
        let raw = json!({
            "price_info": [{"current_price": 120000}],
            "price": 999
        });
        assert_eq!(resolve_i64(&raw, shopee_paths::MODEL_PRICE), 120000);

        // first candidate absent: fall through in declared order
        let raw = json!({"price": 999});
        assert_eq!(resolve_i64(&raw, shopee_paths::MODEL_PRICE), 999);
    }

    #[test]
    fn resolve_skips_null() {
        let raw = json!({"item_name": null, "name": "Kaos Polo"});
        assert_eq!(resolve_str(&raw, shopee_paths::ITEM_NAME), "Kaos Polo");
    }

    #[test]
    fn micro_unit_conversion_is_threshold_guarded() {
        assert_eq!(shopee_display_price(123_450_000_000), 1_234_500);
        assert_eq!(shopee_display_price(250_000), 250_000);
        assert_eq!(shopee_display_price(0), 0);
        assert_eq!(shopee_display_price(-123_450_000_000), -1_234_500);
    }

    #[test]
    fn shopee_variant_totals_missing_fields() {
        let variant = shopee_variant(77, &json!({"model_id": "901"}));
        assert_eq!(variant.external_item_id, "77");
        assert_eq!(variant.external_variant_id, "901");
        assert_eq!(variant.name, "");
        assert_eq!(variant.price, 0);
        assert_eq!(variant.stock, 0);
    }

    #[test]
    fn shopee_variant_stock_paths() {
        let raw = json!({
            "model_id": 901,
            "model_name": "Merah",
            "model_sku": "KP-M",
            "price_info": [{"current_price": "1,250,000,000"}],
            "stock_info_v2": {"summary_info": {"total_available_stock": 14}}
        });
        let variant = shopee_variant(77, &raw);
        assert_eq!(variant.name, "Merah");
        assert_eq!(variant.sku, "KP-M");
        assert_eq!(variant.price, 12_500);
        assert_eq!(variant.stock, 14);
    }

    #[test]
    fn tiktok_variant_name_joins_attributes() {
        let raw = json!({
            "sales_attributes": [
                {"value_name": "Merah"},
                {"original_value_name": "XL"}
            ]
        });
        assert_eq!(tiktok_variant_name(&raw), "Merah / XL");
    }

    #[test]
    fn tiktok_variant_name_fallback_chain() {
        assert_eq!(
            tiktok_variant_name(&json!({"seller_sku": "KP-M"})),
            "KP-M"
        );
        assert_eq!(tiktok_variant_name(&json!({})), "Default Variant");
    }

    #[test]
    fn tiktok_product_aggregates_skus() {
        let data = json!({
            "title": "Kaos Polo",
            "skus": [
                {
                    "id": "111",
                    "seller_sku": "KP-M",
                    "sales_attributes": [{"value_name": "Merah"}],
                    "price": {"sale_price": "150000"},
                    "inventory": [{"warehouse_id": "w1", "quantity": 3}]
                },
                {
                    "id": "112",
                    "sales_attributes": [{"value_name": "Biru"}],
                    "price": {"tax_exclusive_price": 140000},
                    "inventory": [{"warehouse_id": "w1", "quantity": 2}]
                }
            ]
        });
        let product = tiktok_product("7350", &data);
        assert_eq!(product.name, "Kaos Polo");
        assert_eq!(product.variants.len(), 2);
        assert_eq!(product.price_min, 140000);
        assert_eq!(product.price_max, 150000);
        assert_eq!(product.stock, 5);
        assert_eq!(product.variants[1].name, "Biru");
        assert_eq!(product.variants[1].price, 140000);
    }
}
