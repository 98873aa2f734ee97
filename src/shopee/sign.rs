//! Shopee Open Platform v2 request signatures.
//!
//! The base string is a plain concatenation, no separators:
//! public endpoints sign `{partner_id}{path}{timestamp}`, shop endpoints
//! append `{access_token}{shop_id}`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn hmac_hex(key: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).expect("hmac accepts keys of any length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn public_sign(partner_key: &str, partner_id: i64, path: &str, timestamp: i64) -> String {
    hmac_hex(partner_key, &format!("{partner_id}{path}{timestamp}"))
}

pub fn shop_sign(
    partner_key: &str,
    partner_id: i64,
    path: &str,
    timestamp: i64,
    access_token: &str,
    shop_id: i64,
) -> String {
    hmac_hex(
        partner_key,
        &format!("{partner_id}{path}{timestamp}{access_token}{shop_id}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "6a4b2c8d";
    const PATH: &str = "/api/v2/product/get_item_list";

    #[test]
    fn digest_is_lowercase_hex() {
        let sig = public_sign(KEY, 2005000, PATH, 1_700_000_000);
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let a = shop_sign(KEY, 2005000, PATH, 1_700_000_000, "tok", 99);
        let b = shop_sign(KEY, 2005000, PATH, 1_700_000_000, "tok", 99);
        assert_eq!(a, b);
    }

    #[test]
    fn timestamp_changes_digest() {
        let a = public_sign(KEY, 2005000, PATH, 1_700_000_000);
        let b = public_sign(KEY, 2005000, PATH, 1_700_000_001);
        assert_ne!(a, b);
    }

    #[test]
    fn shop_fields_participate() {
        let base = shop_sign(KEY, 2005000, PATH, 1_700_000_000, "tok", 99);
        assert_ne!(base, shop_sign(KEY, 2005000, PATH, 1_700_000_000, "tok2", 99));
        assert_ne!(base, shop_sign(KEY, 2005000, PATH, 1_700_000_000, "tok", 100));
        assert_ne!(base, public_sign(KEY, 2005000, PATH, 1_700_000_000));
    }
}
