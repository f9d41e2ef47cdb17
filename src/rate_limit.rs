//! Rate limiting for sign-up, login and password recovery.
//!
//! Token buckets keyed by client IP. Requests whose client IP cannot be
//! determined are refused rather than pooled.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc, time::Duration};
use tracing::debug;

use crate::auth::extract_client_ip;
use crate::cli::IpExtractor;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Interval between sweeps of idle buckets.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Requests allowed per minute and client.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    pub signup_per_minute: u32,
    pub login_per_minute: u32,
    pub recovery_per_minute: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            signup_per_minute: 5,
            login_per_minute: 10,
            recovery_per_minute: 3,
        }
    }
}

impl RateLimitSettings {
    /// Limits high enough that tests never hit them.
    pub fn relaxed() -> Self {
        Self {
            signup_per_minute: 10_000,
            login_per_minute: 10_000,
            recovery_per_minute: 10_000,
        }
    }
}

#[derive(Clone)]
pub struct RateLimitConfig {
    pub signup: Arc<IpLimiter>,
    pub login: Arc<IpLimiter>,
    pub recovery: Arc<IpLimiter>,
    /// Where the client IP comes from; `None` means the socket address
    pub ip_extractor: Option<IpExtractor>,
}

fn per_minute(n: u32) -> Arc<IpLimiter> {
    let n = NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::keyed(Quota::per_minute(n)))
}

/// Drop buckets that have refilled completely, returning how many remain.
fn prune(limiter: &IpLimiter) -> usize {
    limiter.retain_recent();
    limiter.shrink_to_fit();
    limiter.len()
}

impl RateLimitConfig {
    pub fn new(settings: &RateLimitSettings, ip_extractor: Option<IpExtractor>) -> Self {
        Self {
            signup: per_minute(settings.signup_per_minute),
            login: per_minute(settings.login_per_minute),
            recovery: per_minute(settings.recovery_per_minute),
            ip_extractor,
        }
    }

    /// Forget clients whose buckets are full again.
    pub fn retain_recent(&self) {
        let remaining = prune(&self.signup) + prune(&self.login) + prune(&self.recovery);
        debug!(remaining, "Pruned rate limiter buckets");
    }
}

/// Spawn a background task that prunes idle buckets periodically.
pub fn spawn_pruning(config: Arc<RateLimitConfig>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);

        loop {
            interval.tick().await;
            config.retain_recent();
        }
    })
}

async fn check(
    config: &RateLimitConfig,
    limiter: &IpLimiter,
    request: Request,
    next: Next,
    message: &'static str,
) -> Response {
    let ip = match extract_client_ip(&request, config.ip_extractor.as_ref()) {
        Ok(ip) => ip,
        Err(reason) => {
            debug!(reason, "Refusing request without a client IP");
            return (StatusCode::FORBIDDEN, "Unable to determine client IP.").into_response();
        }
    };

    match limiter.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => (StatusCode::TOO_MANY_REQUESTS, message).into_response(),
    }
}

pub async fn rate_limit_signup(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(
        &config,
        &config.signup,
        request,
        next,
        "Too many signup attempts. Please wait before trying again.",
    )
    .await
}

pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(
        &config,
        &config.login,
        request,
        next,
        "Too many authentication attempts. Please wait before trying again.",
    )
    .await
}

pub async fn rate_limit_recovery(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(
        &config,
        &config.recovery,
        request,
        next,
        "Too many recovery requests. Please try again later.",
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_blocks_after_quota() {
        let config = RateLimitConfig::new(
            &RateLimitSettings {
                signup_per_minute: 2,
                login_per_minute: 1,
                recovery_per_minute: 1,
            },
            None,
        );
        let ip = "203.0.113.7".to_string();

        assert!(config.signup.check_key(&ip).is_ok());
        assert!(config.signup.check_key(&ip).is_ok());
        assert!(config.signup.check_key(&ip).is_err());
        // Other clients keep their own bucket
        assert!(config.signup.check_key(&"198.51.100.1".to_string()).is_ok());
    }

    #[test]
    fn test_zero_limit_still_allows_one() {
        let config = RateLimitConfig::new(
            &RateLimitSettings {
                signup_per_minute: 0,
                login_per_minute: 0,
                recovery_per_minute: 0,
            },
            None,
        );
        assert!(config.login.check_key(&"a".to_string()).is_ok());
    }

    #[test]
    fn test_prune_drops_refilled_buckets() {
        let fast: IpLimiter =
            RateLimiter::keyed(Quota::per_second(NonZeroU32::new(1000).unwrap()));
        let slow = per_minute(1);
        for i in 0..50 {
            let ip = format!("198.51.100.{}", i);
            assert!(fast.check_key(&ip).is_ok());
            assert!(slow.check_key(&ip).is_ok());
        }
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(prune(&fast), 0);
        // Still-draining buckets survive so their limits keep applying
        assert_eq!(prune(&slow), 50);
        assert!(slow.check_key(&"198.51.100.7".to_string()).is_err());
    }
}
