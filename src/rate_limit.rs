//! Per-IP, per-path fixed-window admission control with a temporary IP blocklist.
//!
//! Each (client IP, path) pair counts requests inside a window that restarts
//! once it is older than the configured duration. Going over the limit blocks
//! the IP on every path until the block expires. Stale records are swept on a
//! small random fraction of requests instead of by a background task.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::DashMap;
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::{Clock, to_iso};
use crate::metrics::{BLOCKED_IPS, RATE_LIMITED};

pub const UNKNOWN_CLIENT: &str = "unknown";
/// Routes the chat function answers on; also the prefixes of the strictest rule.
pub const CHAT_PATHS: [&str; 2] = ["/.netlify/functions/chat", "/api/chat"];
pub const FUNCTION_PREFIXES: &[&str] = &["/.netlify/functions/", "/api/"];

const DEFAULT_SWEEP_PROBABILITY: f64 = 0.01;
const DEFAULT_RETENTION: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
    pub block_duration: Duration,
}

impl RateLimitConfig {
    pub const CHAT: Self = Self {
        window: Duration::from_secs(60),
        max_requests: 30,
        block_duration: Duration::from_secs(300),
    };
    pub const FUNCTIONS: Self = Self {
        window: Duration::from_secs(60),
        max_requests: 100,
        block_duration: Duration::from_secs(120),
    };
    pub const DEFAULT: Self = Self {
        window: Duration::from_secs(60),
        max_requests: 500,
        block_duration: Duration::from_secs(60),
    };

    fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }
}

#[derive(Debug, Clone)]
struct RateLimitRule {
    prefixes: &'static [&'static str],
    config: RateLimitConfig,
}

// Ordered prefix rules, first match wins
#[derive(Debug, Clone)]
pub struct RateLimitRules {
    rules: Vec<RateLimitRule>,
    fallback: RateLimitConfig,
}

impl RateLimitRules {
    pub fn new(chat: RateLimitConfig) -> Self {
        Self {
            rules: vec![
                RateLimitRule {
                    prefixes: &CHAT_PATHS,
                    config: chat,
                },
                RateLimitRule {
                    prefixes: FUNCTION_PREFIXES,
                    config: RateLimitConfig::FUNCTIONS,
                },
            ],
            fallback: RateLimitConfig::DEFAULT,
        }
    }

    pub fn resolve(&self, path: &str) -> RateLimitConfig {
        self.rules
            .iter()
            .find(|rule| rule.prefixes.iter().any(|p| path.starts_with(p)))
            .map(|rule| rule.config)
            .unwrap_or(self.fallback)
    }
}

impl Default for RateLimitRules {
    fn default() -> Self {
        Self::new(RateLimitConfig::CHAT)
    }
}

// Rate limit entry - tracks requests per (IP, path)
#[derive(Debug, Clone)]
pub struct RateLimitEntry {
    pub count: u32,
    pub window_start: u64,
}

#[derive(Debug, Clone)]
pub struct BlockEntry {
    pub until: u64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quota {
    pub limit: u32,
    pub remaining: u32,
    pub reset_ms: u64,
    pub window: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Bypass,
    Allowed(Quota),
    Rejected { retry_after_secs: u64, reason: String },
}

pub struct RateLimiter {
    rules: RateLimitRules,
    windows: DashMap<(String, String), RateLimitEntry>,
    blocks: DashMap<String, BlockEntry>,
    clock: Arc<dyn Clock>,
    sweep_probability: f64,
    retention: Duration,
}

impl RateLimiter {
    pub fn new(rules: RateLimitRules, clock: Arc<dyn Clock>) -> Self {
        Self {
            rules,
            windows: DashMap::new(),
            blocks: DashMap::new(),
            clock,
            sweep_probability: DEFAULT_SWEEP_PROBABILITY,
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_sweep_probability(mut self, probability: f64) -> Self {
        self.sweep_probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn admit(&self, client_ip: &str, method: &Method, path: &str) -> Admission {
        if self.sweep_probability > 0.0 && rand::random::<f64>() < self.sweep_probability {
            self.sweep();
        }

        if is_bypassed(method, path) {
            return Admission::Bypass;
        }

        let now = self.clock.now_ms();
        if let Some((remaining_ms, reason)) = self.active_block(client_ip, now) {
            return Admission::Rejected {
                retry_after_secs: ceil_secs(remaining_ms),
                reason,
            };
        }

        let config = self.rules.resolve(path);
        let key = (client_ip.to_string(), path.to_string());
        let (count, window_start) = {
            let mut entry = self.windows.entry(key.clone()).or_insert(RateLimitEntry {
                count: 0,
                window_start: now,
            });
            // window expired..? Reset it
            if now.saturating_sub(entry.window_start) > config.window_ms() {
                entry.count = 0;
                entry.window_start = now;
            }
            entry.count += 1;
            (entry.count, entry.window_start)
        };

        if count > config.max_requests {
            let reason = format!(
                "Rate limit exceeded: {}/{} requests in {}ms",
                count,
                config.max_requests,
                config.window_ms()
            );
            // Next window starts fresh once the block lifts
            self.windows.remove(&key);
            self.blocks.insert(
                client_ip.to_string(),
                BlockEntry {
                    until: now + config.block_duration.as_millis() as u64,
                    reason: reason.clone(),
                },
            );
            BLOCKED_IPS.set(self.blocks.len() as f64);
            return Admission::Rejected {
                retry_after_secs: ceil_secs(config.block_duration.as_millis() as u64),
                reason,
            };
        }

        Admission::Allowed(Quota {
            limit: config.max_requests,
            remaining: config.max_requests - count,
            reset_ms: window_start + config.window_ms(),
            window: config.window,
        })
    }

    /// Drops window records past the retention horizon and expired blocks.
    pub fn sweep(&self) {
        let now = self.clock.now_ms();
        let retention = self.retention.as_millis() as u64;
        let (windows_before, blocks_before) = (self.windows.len(), self.blocks.len());

        self.windows
            .retain(|_, entry| now.saturating_sub(entry.window_start) <= retention);
        self.blocks.retain(|_, block| now < block.until);
        BLOCKED_IPS.set(self.blocks.len() as f64);

        debug!(
            windows_removed = windows_before.saturating_sub(self.windows.len()),
            blocks_removed = blocks_before.saturating_sub(self.blocks.len()),
            "rate limit sweep"
        );
    }

    fn active_block(&self, client_ip: &str, now: u64) -> Option<(u64, String)> {
        // Only an expired block is removed; one set concurrently survives the check
        if self
            .blocks
            .remove_if(client_ip, |_, block| now >= block.until)
            .is_some()
        {
            BLOCKED_IPS.set(self.blocks.len() as f64);
        }
        self.blocks
            .get(client_ip)
            .filter(|block| now < block.until)
            .map(|block| (block.until - now, block.reason.clone()))
    }
}

fn ceil_secs(ms: u64) -> u64 {
    ms.div_ceil(1000)
}

/// Static assets, crawler files and a plain GET of the site root never count.
pub fn is_bypassed(method: &Method, path: &str) -> bool {
    path.starts_with("/assets/")
        || path.starts_with("/favicon")
        || path == "/robots.txt"
        || path == "/sitemap.xml"
        || (path == "/" && method == Method::GET)
}

/// Paths the gate sits in front of.
pub fn in_scope(path: &str) -> bool {
    FUNCTION_PREFIXES.iter().any(|p| path.starts_with(p))
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(name)?.to_str().ok()?;
    let first = raw.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

/// Proxy-injected headers win over the socket peer; "unknown" if nothing is known.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    header_ip(headers, "cf-connecting-ip")
        .or_else(|| header_ip(headers, "x-real-ip"))
        .or_else(|| header_ip(headers, "x-forwarded-for"))
        .or_else(|| peer.map(|ip| ip.to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn rejection_response(retry_after_secs: u64, reason: &str) -> Response {
    let reason_header = HeaderValue::from_str(reason)
        .unwrap_or_else(|_| HeaderValue::from_static("Rate limit exceeded"));
    let mut resp = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Rate limit exceeded",
            "message": "Too many requests. Please try again later.",
            "retryAfter": retry_after_secs,
        })),
    )
        .into_response();
    let headers = resp.headers_mut();
    headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
    headers.insert(
        HeaderName::from_static("x-ratelimit-blocked"),
        HeaderValue::from_static("true"),
    );
    headers.insert(HeaderName::from_static("x-ratelimit-reason"), reason_header);
    resp
}

fn apply_quota_headers(headers: &mut HeaderMap, quota: &Quota) {
    headers.insert(
        HeaderName::from_static("x-ratelimit-limit"),
        HeaderValue::from(quota.limit),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from(quota.remaining),
    );
    if let Ok(reset) = HeaderValue::from_str(&to_iso(quota.reset_ms)) {
        headers.insert(HeaderName::from_static("x-ratelimit-reset"), reset);
    }
    headers.insert(
        HeaderName::from_static("x-ratelimit-window"),
        HeaderValue::from(quota.window.as_millis() as u64),
    );
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if !in_scope(&path) {
        return next.run(req).await;
    }

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let ip = client_ip(req.headers(), peer);

    match limiter.admit(&ip, req.method(), &path) {
        Admission::Bypass => next.run(req).await,
        Admission::Rejected {
            retry_after_secs,
            reason,
        } => {
            RATE_LIMITED.inc();
            warn!(client_ip = %ip, path = %path, retry_after_secs, reason = %reason, "rate limit exceeded");
            rejection_response(retry_after_secs, &reason)
        }
        Admission::Allowed(quota) => {
            let mut resp = next.run(req).await;
            apply_quota_headers(resp.headers_mut(), &quota);
            resp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use axum::body::Body;
    use axum::routing::{get, post};
    use axum::{Router, middleware};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const T0: u64 = 1_700_000_000_000;
    const CHAT: &str = "/.netlify/functions/chat";

    fn limiter(clock: Arc<ManualClock>) -> RateLimiter {
        RateLimiter::new(RateLimitRules::default(), clock).with_sweep_probability(0.0)
    }

    fn post_chat(l: &RateLimiter, ip: &str) -> Admission {
        l.admit(ip, &Method::POST, CHAT)
    }

    #[test]
    fn thirty_allowed_then_blocked() {
        let clock = Arc::new(ManualClock::new(T0));
        let l = limiter(clock);

        for i in 1..=30 {
            match post_chat(&l, "1.1.1.1") {
                Admission::Allowed(q) => {
                    assert_eq!(q.limit, 30);
                    assert_eq!(q.remaining, 30 - i);
                    assert_eq!(q.reset_ms, T0 + 60_000);
                }
                other => panic!("request {i} was {other:?}"),
            }
        }

        assert_eq!(
            post_chat(&l, "1.1.1.1"),
            Admission::Rejected {
                retry_after_secs: 300,
                reason: "Rate limit exceeded: 31/30 requests in 60000ms".to_string(),
            }
        );
    }

    #[test]
    fn window_resets_after_it_elapses() {
        let clock = Arc::new(ManualClock::new(T0));
        let l = limiter(clock.clone());

        for _ in 0..30 {
            assert!(matches!(post_chat(&l, "1.1.1.1"), Admission::Allowed(_)));
        }
        clock.advance(Duration::from_millis(60_001));

        match post_chat(&l, "1.1.1.1") {
            Admission::Allowed(q) => {
                assert_eq!(q.remaining, 29);
                assert_eq!(q.reset_ms, T0 + 60_001 + 60_000);
            }
            other => panic!("expected fresh window, got {other:?}"),
        }
    }

    #[test]
    fn block_supersedes_window_until_it_expires() {
        let clock = Arc::new(ManualClock::new(T0));
        let l = limiter(clock.clone());

        for _ in 0..31 {
            post_chat(&l, "1.1.1.1");
        }

        // The window has room again but the block still holds
        clock.advance(Duration::from_secs(61));
        match post_chat(&l, "1.1.1.1") {
            Admission::Rejected {
                retry_after_secs,
                reason,
            } => {
                assert_eq!(retry_after_secs, 239);
                assert!(reason.starts_with("Rate limit exceeded: 31/30"));
            }
            other => panic!("expected block, got {other:?}"),
        }

        // Other paths are blocked for the same IP
        assert!(matches!(
            l.admit("1.1.1.1", &Method::GET, "/api/other"),
            Admission::Rejected { .. }
        ));

        clock.set(T0 + 300_000);
        match post_chat(&l, "1.1.1.1") {
            Admission::Allowed(q) => assert_eq!(q.remaining, 29),
            other => panic!("expected allow after block, got {other:?}"),
        }
    }

    #[test]
    fn expired_block_is_cleared_but_live_block_kept() {
        let clock = Arc::new(ManualClock::new(T0));
        let l = limiter(clock.clone());
        let block = |until| BlockEntry {
            until,
            reason: "test".to_string(),
        };
        l.blocks.insert("1.1.1.1".to_string(), block(T0 + 1_000));
        l.blocks.insert("2.2.2.2".to_string(), block(T0 + 5_000));

        clock.advance(Duration::from_secs(2));
        assert_eq!(l.active_block("1.1.1.1", clock.now_ms()), None);
        assert!(!l.blocks.contains_key("1.1.1.1"));

        assert_eq!(
            l.active_block("2.2.2.2", clock.now_ms()),
            Some((3_000, "test".to_string()))
        );
        assert!(l.blocks.contains_key("2.2.2.2"));
    }

    #[test]
    fn blocked_requests_do_not_touch_counters() {
        let clock = Arc::new(ManualClock::new(T0));
        let l = limiter(clock);
        for _ in 0..31 {
            post_chat(&l, "1.1.1.1");
        }
        for _ in 0..5 {
            post_chat(&l, "1.1.1.1");
        }
        assert!(l.windows.is_empty());
    }

    #[test]
    fn ips_and_paths_are_counted_separately() {
        let clock = Arc::new(ManualClock::new(T0));
        let l = limiter(clock);
        for _ in 0..31 {
            post_chat(&l, "1.1.1.1");
        }
        assert!(matches!(post_chat(&l, "2.2.2.2"), Admission::Allowed(_)));

        match l.admit("3.3.3.3", &Method::GET, "/api/chat") {
            Admission::Allowed(q) => assert_eq!(q.remaining, 29),
            other => panic!("{other:?}"),
        }
        match l.admit("3.3.3.3", &Method::GET, "/.netlify/functions/other") {
            Admission::Allowed(q) => assert_eq!((q.limit, q.remaining), (100, 99)),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn bypassed_paths_never_count() {
        let clock = Arc::new(ManualClock::new(T0));
        let l = limiter(clock);
        for path in ["/assets/app.js", "/favicon.ico", "/robots.txt", "/sitemap.xml"] {
            assert_eq!(l.admit("1.1.1.1", &Method::GET, path), Admission::Bypass);
        }
        assert_eq!(l.admit("1.1.1.1", &Method::GET, "/"), Admission::Bypass);
        assert!(l.windows.is_empty());
        assert!(matches!(
            l.admit("1.1.1.1", &Method::POST, "/"),
            Admission::Allowed(_)
        ));
    }

    #[test]
    fn rules_resolve_most_specific_first() {
        let rules = RateLimitRules::default();
        assert_eq!(rules.resolve("/.netlify/functions/chat"), RateLimitConfig::CHAT);
        assert_eq!(rules.resolve("/api/chat"), RateLimitConfig::CHAT);
        assert_eq!(rules.resolve("/.netlify/functions/ping"), RateLimitConfig::FUNCTIONS);
        assert_eq!(rules.resolve("/api/anything"), RateLimitConfig::FUNCTIONS);
        assert_eq!(rules.resolve("/pricing"), RateLimitConfig::DEFAULT);
    }

    #[test]
    fn client_ip_prefers_proxy_headers() {
        let peer: Option<IpAddr> = Some("10.0.0.9".parse().unwrap());
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, None), UNKNOWN_CLIENT);
        assert_eq!(client_ip(&headers, peer), "10.0.0.9");

        headers.insert("x-forwarded-for", HeaderValue::from_static(" 5.5.5.5 , 10.0.0.1"));
        assert_eq!(client_ip(&headers, peer), "5.5.5.5");

        headers.insert("x-real-ip", HeaderValue::from_static("6.6.6.6"));
        assert_eq!(client_ip(&headers, peer), "6.6.6.6");

        headers.insert("cf-connecting-ip", HeaderValue::from_static("7.7.7.7"));
        assert_eq!(client_ip(&headers, peer), "7.7.7.7");
    }

    #[test]
    fn sweep_drops_stale_windows_and_expired_blocks() {
        let clock = Arc::new(ManualClock::new(T0));
        let l = limiter(clock.clone());
        for _ in 0..31 {
            post_chat(&l, "1.1.1.1");
        }
        l.admit("2.2.2.2", &Method::GET, "/api/x");
        clock.advance(Duration::from_secs(200));
        l.admit("3.3.3.3", &Method::GET, "/api/x");

        clock.advance(Duration::from_secs(101));
        l.sweep();

        assert!(l.blocks.is_empty());
        assert_eq!(l.windows.len(), 1);
        assert!(l.windows.contains_key(&("3.3.3.3".to_string(), "/api/x".to_string())));
    }

    #[test]
    fn certain_sweep_runs_on_admit() {
        let clock = Arc::new(ManualClock::new(T0));
        let l = RateLimiter::new(RateLimitRules::default(), clock.clone()).with_sweep_probability(1.0);
        l.admit("2.2.2.2", &Method::GET, "/api/x");
        clock.advance(Duration::from_secs(301));
        l.admit("3.3.3.3", &Method::GET, "/api/y");
        assert_eq!(l.windows.len(), 1);
    }

    fn gated_app(limiter: Arc<RateLimiter>) -> Router {
        Router::new()
            .route("/api/chat", post(|| async { "ok" }))
            .route("/metrics", get(|| async { "metrics" }))
            .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
    }

    fn chat_request(ip: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn middleware_annotates_allowed_responses() {
        let clock = Arc::new(ManualClock::new(T0));
        let app = gated_app(Arc::new(limiter(clock)));

        let resp = app.oneshot(chat_request("8.8.8.8")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let h = resp.headers();
        assert_eq!(h["x-ratelimit-limit"], "30");
        assert_eq!(h["x-ratelimit-remaining"], "29");
        assert_eq!(h["x-ratelimit-window"], "60000");
        assert_eq!(h["x-ratelimit-reset"], "2023-11-14T22:14:20.000Z");
    }

    #[tokio::test]
    async fn middleware_rejects_with_429() {
        let clock = Arc::new(ManualClock::new(T0));
        let rules = RateLimitRules::new(RateLimitConfig {
            window: Duration::from_secs(60),
            max_requests: 2,
            block_duration: Duration::from_secs(90),
        });
        let app = gated_app(Arc::new(
            RateLimiter::new(rules, clock).with_sweep_probability(0.0),
        ));

        for _ in 0..2 {
            let resp = app.clone().oneshot(chat_request("8.8.8.8")).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
        let resp = app.clone().oneshot(chat_request("8.8.8.8")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()["retry-after"], "90");
        assert_eq!(resp.headers()["x-ratelimit-blocked"], "true");
        assert_eq!(
            resp.headers()["x-ratelimit-reason"],
            "Rate limit exceeded: 3/2 requests in 60000ms"
        );
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Rate limit exceeded");
        assert_eq!(body["retryAfter"], 90);

        // Someone else is unaffected
        let resp = app.clone().oneshot(chat_request("9.9.9.9")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // Out-of-scope paths are left alone
        let req = axum::http::Request::builder()
            .uri("/metrics")
            .header("x-forwarded-for", "8.8.8.8")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get("x-ratelimit-limit").is_none());
    }
}
