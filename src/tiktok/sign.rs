//! TikTok Shop open API signature.
//!
//! Base string: `secret + path + k1v1..knvn + body + secret` with query
//! keys sorted lexicographically, `sign` and `access_token` excluded, and
//! the body skipped for multipart uploads. The digest is keyed with the
//! same app secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const EXCLUDED_KEYS: [&str; 2] = ["sign", "access_token"];

pub fn sign_request(
    secret: &str,
    path: &str,
    query: &[(String, String)],
    content_type: &str,
    body: &[u8],
) -> String {
    let mut pairs: Vec<&(String, String)> = query
        .iter()
        .filter(|(k, _)| !EXCLUDED_KEYS.contains(&k.as_str()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut base = String::from(secret);
    base.push_str(path);
    for (k, v) in pairs {
        base.push_str(k);
        base.push_str(v);
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts keys of any length");
    mac.update(base.as_bytes());
    if !content_type.starts_with("multipart/form-data") {
        mac.update(body);
    }
    mac.update(secret.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    const SECRET: &str = "0a1b2c3d";
    const PATH: &str = "/product/202309/products/search";

    #[test]
    fn query_order_does_not_matter() {
        let a = sign_request(
            SECRET,
            PATH,
            &q(&[("app_key", "k1"), ("timestamp", "170"), ("shop_cipher", "c")]),
            "application/json",
            b"{}",
        );
        let b = sign_request(
            SECRET,
            PATH,
            &q(&[("shop_cipher", "c"), ("app_key", "k1"), ("timestamp", "170")]),
            "application/json",
            b"{}",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn sign_and_access_token_are_excluded() {
        let bare = sign_request(SECRET, PATH, &q(&[("app_key", "k1")]), "application/json", b"");
        let noisy = sign_request(
            SECRET,
            PATH,
            &q(&[("app_key", "k1"), ("sign", "junk"), ("access_token", "tok")]),
            "application/json",
            b"",
        );
        assert_eq!(bare, noisy);
    }

    #[test]
    fn body_participates_unless_multipart() {
        let with_body = sign_request(SECRET, PATH, &q(&[]), "application/json", b"{\"a\":1}");
        let without = sign_request(SECRET, PATH, &q(&[]), "application/json", b"");
        assert_ne!(with_body, without);

        let multipart = sign_request(
            SECRET,
            PATH,
            &q(&[]),
            "multipart/form-data; boundary=xyz",
            b"{\"a\":1}",
        );
        assert_eq!(multipart, without);
    }

    #[test]
    fn digest_is_lowercase_hex() {
        let sig = sign_request(SECRET, PATH, &q(&[("app_key", "k1")]), "application/json", b"");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
