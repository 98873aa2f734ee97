use reqwest::Client;
use std::time::Duration;

/// Every outbound marketplace call goes through a client built here so the
/// request/connect timeouts are bounded in exactly one place.
pub fn build_client() -> Client {
    let timeout = std::env::var("HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(20);
    let connect = std::env::var("HTTP_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(5);
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .user_agent("agni-sync-rs/0.1")
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Transport failures get exactly one retry; anything that reached the
/// platform (any HTTP status) is returned as-is for the caller to interpret.
/// The closure rebuilds the request so a retry is signed fresh.
pub async fn send_with_retry<F>(mut build: F) -> Result<reqwest::Response, reqwest::Error>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    match build().send().await {
        Ok(response) => Ok(response),
        Err(first) => {
            if first.is_builder() || first.is_redirect() {
                return Err(first);
            }
            tracing::debug!(target = "agni.http", error = %first, "retrying after transport error");
            build().send().await
        }
    }
}
