//! Fixed-window rate limiting middleware.
//!
//! Counters live in a process-local map keyed by client IP and tier. The
//! first request after a window ends opens a new window. Expired windows are
//! swept opportunistically every `sweep_every` checks and by a background
//! task. Limits are per process; several instances do not share counters.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::ApiError;
use crate::config::RateLimitConfig;
use crate::AppState;

/// Rate limit tier for different endpoint types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    /// General API endpoints
    Api,
    /// Login and invitation acceptance
    Auth,
    /// Public contact form
    Contact,
    /// Scheduled-message callbacks
    Webhook,
}

impl RateLimitTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitTier::Api => "api",
            RateLimitTier::Auth => "auth",
            RateLimitTier::Contact => "contact",
            RateLimitTier::Webhook => "webhook",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Information about rate limit status
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Maximum requests per window
    pub limit: u32,
    /// Seconds until the window resets
    pub reset_after: u64,
}

#[derive(Debug)]
pub struct RateLimiter {
    entries: DashMap<(IpAddr, RateLimitTier), Window>,
    config: RateLimitConfig,
    window: Duration,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            entries: DashMap::new(),
            window: Duration::from_secs(config.window_seconds.max(1)),
            checks: AtomicU64::new(0),
            config,
        }
    }

    pub fn limit_for(&self, tier: RateLimitTier) -> u32 {
        match tier {
            RateLimitTier::Api => self.config.api_requests_per_window,
            RateLimitTier::Auth => self.config.auth_requests_per_window,
            RateLimitTier::Contact => self.config.contact_requests_per_window,
            RateLimitTier::Webhook => self.config.webhook_requests_per_window,
        }
    }

    /// Count a request. Returns the remaining budget, or the seconds to wait.
    pub fn check_rate_limit(&self, ip: IpAddr, tier: RateLimitTier) -> Result<RateLimitInfo, u64> {
        self.check_at(ip, tier, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, tier: RateLimitTier, now: Instant) -> Result<RateLimitInfo, u64> {
        let limit = self.limit_for(tier);
        if !self.config.enabled {
            return Ok(RateLimitInfo {
                remaining: u32::MAX,
                limit: u32::MAX,
                reset_after: 0,
            });
        }

        let checks = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if self.config.sweep_every > 0 && checks % self.config.sweep_every == 0 {
            self.sweep_at(now);
        }

        let mut entry = self.entries.entry((ip, tier)).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        let reset_after = self
            .window
            .saturating_sub(now.duration_since(entry.started))
            .as_secs()
            .max(1);

        if entry.count >= limit {
            Err(reset_after)
        } else {
            entry.count += 1;
            Ok(RateLimitInfo {
                remaining: limit - entry.count,
                limit,
                reset_after,
            })
        }
    }

    /// Drop windows that have ended
    pub fn cleanup_expired(&self) {
        self.sweep_at(Instant::now());
    }

    fn sweep_at(&self, now: Instant) {
        let window = self.window;
        self.entries
            .retain(|_, w| now.duration_since(w.started) < window);
    }

    /// Get the number of tracked entries (for monitoring)
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Client IP from proxy headers, falling back to loopback
pub fn extract_client_ip(headers: &HeaderMap) -> IpAddr {
    let header_ip = |name: &str, first_of_list: bool| {
        let value = headers.get(name)?.to_str().ok()?;
        let candidate = if first_of_list {
            value.split(',').next()?
        } else {
            value
        };
        candidate.trim().parse::<IpAddr>().ok()
    };

    header_ip("x-forwarded-for", true)
        .or_else(|| header_ip("x-real-ip", false))
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

pub async fn rate_limit_api(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    rate_limit_with_tier(state, request, next, RateLimitTier::Api).await
}

pub async fn rate_limit_auth(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    rate_limit_with_tier(state, request, next, RateLimitTier::Auth).await
}

pub async fn rate_limit_contact(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    rate_limit_with_tier(state, request, next, RateLimitTier::Contact).await
}

pub async fn rate_limit_webhook(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    rate_limit_with_tier(state, request, next, RateLimitTier::Webhook).await
}

fn header_value(n: impl ToString) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

async fn rate_limit_with_tier(
    state: Arc<AppState>,
    request: Request<Body>,
    next: Next,
    tier: RateLimitTier,
) -> Response {
    let ip = extract_client_ip(request.headers());

    match state.rate_limiter.check_rate_limit(ip, tier) {
        Ok(info) => {
            let mut response = next.run(request).await;
            if info.limit != u32::MAX {
                let headers = response.headers_mut();
                headers.insert("X-RateLimit-Limit", header_value(info.limit));
                headers.insert("X-RateLimit-Remaining", header_value(info.remaining));
                headers.insert("X-RateLimit-Reset", header_value(info.reset_after));
            }
            response
        }
        Err(retry_after) => {
            tracing::debug!(ip = %ip, tier = tier.as_str(), "Rate limit exceeded");
            let mut response = ApiError::rate_limited(format!(
                "Rate limit exceeded. Try again in {} seconds.",
                retry_after
            ))
            .into_response();
            let headers = response.headers_mut();
            headers.insert("Retry-After", header_value(retry_after));
            headers.insert("X-RateLimit-Limit", header_value(state.rate_limiter.limit_for(tier)));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
            response
        }
    }
}

/// Spawn a background task to periodically clean up expired rate limit entries
pub fn spawn_cleanup_task(rate_limiter: Arc<RateLimiter>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cleanup_interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            rate_limiter.cleanup_expired();
            tracing::debug!(
                "Rate limiter cleanup complete, {} entries remaining",
                rate_limiter.entry_count()
            );
        }
    });
}
