use crate::error::AppError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

/// Rate limiter keyed by client IP address
pub type IpRateLimiter = Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>>;

/// Build a quota admitting `attempts` requests per `window_seconds`, refilled evenly.
fn quota(attempts: u32, window_seconds: u64) -> Quota {
    let burst = NonZeroU32::new(attempts.max(1)).unwrap_or(NonZeroU32::MIN);
    let period = Duration::from_millis((window_seconds.max(1) * 1000) / u64::from(burst.get()));
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

/// Create a keyed rate limiter (by client IP)
pub fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    Arc::new(RateLimiter::dashmap(quota(attempts, window_seconds)))
}

/// Resolve the client IP: first `X-Forwarded-For` hop, else the socket peer.
pub fn client_ip(request: &Request) -> Option<IpAddr> {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok());

    forwarded.or_else(|| {
        request
            .extensions()
            .get::<axum::extract::ConnectInfo<SocketAddr>>()
            .map(|axum::extract::ConnectInfo(addr)| addr.ip())
    })
}

/// Middleware for IP-based rate limiting, applied before handler dispatch
pub async fn ip_rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(ip) = client_ip(&request) else {
        tracing::warn!("Could not determine IP for rate limiting");
        return Ok(next.run(request).await);
    };

    match limiter.check_key(&ip) {
        Ok(_) => Ok(next.run(request).await),
        Err(negative) => {
            let wait_time = negative.wait_time_from(DefaultClock::default().now());
            tracing::warn!(client_ip = %ip, "Rate limit exceeded");
            Err(AppError::TooManyRequests(
                "Too many requests from this IP. Please try again later.".to_string(),
                Some(wait_time.as_secs().max(1)),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_allows_burst_then_blocks() {
        let limiter = create_ip_rate_limiter(3, 60);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        for _ in 0..3 {
            assert!(limiter.check_key(&ip).is_ok());
        }
        assert!(limiter.check_key(&ip).is_err());

        // Other clients have their own bucket
        let other: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(limiter.check_key(&other).is_ok());
    }
}
