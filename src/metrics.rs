use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};


lazy_static! {
    pub static ref CHAT_REQUESTS: Counter =
        register_counter!("chat_requests_total", "Total number of chat turns received").unwrap();
    pub static ref CANNED_REPLIES: Counter =
        register_counter!("chat_canned_replies_total", "Chat turns answered from the canned table").unwrap();
    pub static ref FALLBACK_REPLIES: Counter =
        register_counter!("chat_fallback_replies_total", "Chat turns answered with the fallback apology").unwrap();
    pub static ref UPSTREAM_ATTEMPTS: CounterVec = register_counter_vec!(
        "chat_upstream_attempts_total",
        "Upstream completion attempts by outcome",
        &["outcome"]
    )
    .unwrap();
    pub static ref COOLDOWN_SKIPS: Counter =
        register_counter!("chat_cooldown_skips_total", "Attempts skipped because the key was cooling down").unwrap();
    pub static ref RATE_LIMITED: Counter =
        register_counter!("chat_rate_limited_total", "Requests rejected by the rate limiter").unwrap();
    pub static ref DISPATCH_LATENCY: Histogram = register_histogram!(
        "chat_dispatch_latency_seconds",
        "Time spent obtaining a completion, across all attempts"
    )
    .unwrap();
    pub static ref BLOCKED_IPS: Gauge =
        register_gauge!("chat_rate_limit_blocked_ips", "Client IPs currently blocked").unwrap();
}
