use tracing::trace;

// Trace-based counters; the Prometheus recorder in main picks up the real
// request metrics via the tower-http trace layer.

pub fn inc_requests(route: &'static str) {
    trace!(target = "agni.metrics", route = route, "requests_total_inc");
}

pub fn platform_call(platform: &'static str, endpoint: &str, elapsed_ms: u128) {
    trace!(
        target = "agni.metrics",
        platform = platform,
        endpoint = endpoint,
        elapsed_ms = elapsed_ms as u64,
        "platform_call_elapsed"
    );
}
