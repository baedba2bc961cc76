//! Per-IP rate limiting with a sliding window token bucket. Auth routes
//! get a tighter budget than general API traffic; the payment webhook
//! gets a wider one.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use serde_json::json;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    Api,
    Auth,
    Webhook,
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: u32,
    window_start: Instant,
    last_request: Instant,
}

/// Thread-safe limiter keyed by (client IP, tier).
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<(IpAddr, RateLimitTier), Bucket>,
    config: RateLimitConfig,
    window: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: u64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            window: Duration::from_secs(config.window_seconds),
            config,
        }
    }

    fn tier_limit(&self, tier: RateLimitTier) -> u32 {
        match tier {
            RateLimitTier::Api => self.config.api_requests_per_window,
            RateLimitTier::Auth => self.config.auth_requests_per_window,
            RateLimitTier::Webhook => self.config.webhook_requests_per_window,
        }
    }

    /// Consume a token for this client. `Err` carries the retry-after
    /// seconds when the budget is exhausted.
    pub fn check(&self, ip: IpAddr, tier: RateLimitTier) -> Result<RateLimitInfo, u64> {
        if !self.config.enabled {
            return Ok(RateLimitInfo {
                limit: u32::MAX,
                remaining: u32::MAX,
                reset_after: 0,
            });
        }

        let limit = self.tier_limit(tier);
        let now = Instant::now();
        let mut bucket = self.buckets.entry((ip, tier)).or_insert_with(|| Bucket {
            tokens: limit,
            window_start: now,
            last_request: now,
        });

        let elapsed = now.duration_since(bucket.window_start);
        if elapsed >= self.window {
            bucket.tokens = limit;
            bucket.window_start = now;
        } else {
            // Tokens trickle back in proportion to idle time
            let idle = now.duration_since(bucket.last_request).as_secs_f64();
            let refill = (idle * limit as f64 / self.window.as_secs_f64()) as u32;
            bucket.tokens = (bucket.tokens + refill).min(limit);
        }
        bucket.last_request = now;

        if bucket.tokens == 0 {
            return Err(self.window.saturating_sub(elapsed).as_secs().max(1));
        }
        bucket.tokens -= 1;
        Ok(RateLimitInfo {
            limit,
            remaining: bucket.tokens,
            reset_after: self.window.saturating_sub(elapsed).as_secs(),
        })
    }

    /// Drop buckets whose window is long gone.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let expiry = self.window * 2;
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.window_start) < expiry);
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Client IP from proxy headers, falling back to localhost.
fn client_ip(request: &Request<Body>) -> IpAddr {
    let header_ip = |name: &str| -> Option<IpAddr> {
        request
            .headers()
            .get(name)?
            .to_str()
            .ok()?
            .split(',')
            .next()?
            .trim()
            .parse()
            .ok()
    };
    header_ip("x-forwarded-for")
        .or_else(|| header_ip("x-real-ip"))
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

pub async fn limit_api(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    limit_with_tier(state, request, next, RateLimitTier::Api).await
}

pub async fn limit_auth(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    limit_with_tier(state, request, next, RateLimitTier::Auth).await
}

pub async fn limit_webhook(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    limit_with_tier(state, request, next, RateLimitTier::Webhook).await
}

async fn limit_with_tier(
    state: Arc<AppState>,
    request: Request<Body>,
    next: Next,
    tier: RateLimitTier,
) -> Result<Response, Response> {
    let ip = client_ip(&request);

    match state.rate_limiter.check(ip, tier) {
        Ok(info) => {
            let response = next.run(request).await;
            let (mut parts, body) = response.into_parts();
            if let Ok(value) = info.limit.to_string().parse() {
                parts.headers.insert("X-RateLimit-Limit", value);
            }
            if let Ok(value) = info.remaining.to_string().parse() {
                parts.headers.insert("X-RateLimit-Remaining", value);
            }
            if let Ok(value) = info.reset_after.to_string().parse() {
                parts.headers.insert("X-RateLimit-Reset", value);
            }
            Ok(Response::from_parts(parts, body))
        }
        Err(retry_after) => Err((
            StatusCode::TOO_MANY_REQUESTS,
            [
                ("Retry-After", retry_after.to_string()),
                ("X-RateLimit-Remaining", "0".to_string()),
            ],
            Json(json!({
                "status": "fail",
                "message": "Too many requests from this IP, please try again later!",
            })),
        )
            .into_response()),
    }
}

/// Periodically evict stale buckets.
pub fn spawn_cleanup_task(rate_limiter: Arc<RateLimiter>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cleanup_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            rate_limiter.cleanup_expired();
            tracing::debug!(
                "Rate limiter cleanup complete, {} buckets remaining",
                rate_limiter.bucket_count()
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            api_requests_per_window: 10,
            auth_requests_per_window: 3,
            webhook_requests_per_window: 50,
            window_seconds: 60,
            cleanup_interval: 300,
        }
    }

    #[test]
    fn allows_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new(test_config());
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        for _ in 0..10 {
            assert!(limiter.check(ip, RateLimitTier::Api).is_ok());
        }
        assert!(limiter.check(ip, RateLimitTier::Api).is_err());
    }

    #[test]
    fn addresses_are_tracked_independently() {
        let limiter = RateLimiter::new(test_config());
        let first: IpAddr = "10.0.0.1".parse().unwrap();
        let second: IpAddr = "10.0.0.2".parse().unwrap();

        for _ in 0..10 {
            let _ = limiter.check(first, RateLimitTier::Api);
        }
        assert!(limiter.check(first, RateLimitTier::Api).is_err());
        assert!(limiter.check(second, RateLimitTier::Api).is_ok());
    }

    #[test]
    fn auth_tier_is_tighter_than_api() {
        let limiter = RateLimiter::new(test_config());
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        for _ in 0..3 {
            let _ = limiter.check(ip, RateLimitTier::Auth);
        }
        assert!(limiter.check(ip, RateLimitTier::Auth).is_err());
        assert!(limiter.check(ip, RateLimitTier::Api).is_ok());
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let mut config = test_config();
        config.enabled = false;
        let limiter = RateLimiter::new(config);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        for _ in 0..100 {
            assert!(limiter.check(ip, RateLimitTier::Api).is_ok());
        }
    }

    #[test]
    fn recent_buckets_survive_cleanup() {
        let limiter = RateLimiter::new(test_config());
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        let _ = limiter.check(ip, RateLimitTier::Api);
        assert_eq!(limiter.bucket_count(), 1);
        limiter.cleanup_expired();
        assert_eq!(limiter.bucket_count(), 1);
    }
}
