//! Stock writes to TikTok Shop.

use super::TikTokError;
use super::catalog::TikTokClient;
use serde_json::json;
use tracing::info;

/// Sets the absolute quantity for one SKU in the configured warehouse.
/// The write targets a single warehouse; multi-warehouse allocation is a
/// seller-side concern this engine does not take on.
pub async fn update_stock(
    client: &TikTokClient,
    product_id: &str,
    sku_id: &str,
    quantity: i64,
) -> Result<(), TikTokError> {
    let path = format!("/product/202309/products/{product_id}/inventory/update");
    let body = json!({
        "skus": [{
            "id": sku_id,
            "inventory": [{
                "warehouse_id": client.warehouse_id(),
                "quantity": quantity,
            }],
        }],
    });
    client.call_api(&path, &[], Some(body)).await?;
    info!(target: "agni.tiktok", product_id, sku_id, quantity, "inventory updated");
    Ok(())
}
