mod store;

use std::sync::Arc;

use axum::http::HeaderMap;
use time::OffsetDateTime;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::AppError;

pub use store::{CounterStore, MemoryCounterStore};

pub const MINUTE_MS: i64 = 60 * 1000;
pub const HOUR_MS: i64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub success: bool,
    pub remaining: u32,
    /// Epoch seconds at which the window frees up.
    pub reset_at: i64,
}

/// Sliding-window log limiter over a [`CounterStore`]. Best-effort by
/// design: a read-then-write race may admit slightly over the limit, and a
/// store failure admits the request (fail open) rather than blocking it.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    pub async fn allow(&self, key: &str, window_ms: i64, max: u32) -> Decision {
        let now_ms = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        self.allow_at(key, window_ms, max, now_ms).await
    }

    pub async fn allow_at(&self, key: &str, window_ms: i64, max: u32, now_ms: i64) -> Decision {
        match self.try_allow(key, window_ms, max, now_ms).await {
            Ok(decision) => decision,
            Err(e) => {
                // Availability over strictness: an unreachable counter store
                // must not lock callers out.
                error!(error = %e, key, "counter store unavailable, failing open");
                Decision {
                    success: true,
                    remaining: max,
                    reset_at: (now_ms + window_ms) / 1000,
                }
            }
        }
    }

    async fn try_allow(
        &self,
        key: &str,
        window_ms: i64,
        max: u32,
        now_ms: i64,
    ) -> anyhow::Result<Decision> {
        let floor = now_ms - window_ms;
        let stamps = self.store.range_by_score(key, floor, now_ms).await?;
        let count = stamps.len() as u32;

        if count >= max {
            let oldest = stamps.iter().min().copied().unwrap_or(now_ms);
            warn!(key, count, max, "rate limit exceeded");
            return Ok(Decision {
                success: false,
                remaining: 0,
                reset_at: (oldest + window_ms) / 1000,
            });
        }

        self.store
            .add_scored(key, now_ms, format!("{now_ms}-{}", Uuid::new_v4()))
            .await?;
        self.store.remove_range_by_score(key, 0, floor - 1).await?;
        self.store.expire(key, (window_ms / 1000) as u64).await?;

        Ok(Decision {
            success: true,
            remaining: max - count - 1,
            reset_at: (now_ms + window_ms) / 1000,
        })
    }

    /// Guard used by handlers: keys the window on `purpose:client_ip` and
    /// maps a denial to [`AppError::RateLimited`].
    pub async fn check(
        &self,
        purpose: &str,
        headers: &HeaderMap,
        window_ms: i64,
        max: u32,
    ) -> Result<(), AppError> {
        let key = format!("{purpose}:{}", client_ip(headers));
        let decision = self.allow(&key, window_ms, max).await;
        if decision.success {
            Ok(())
        } else {
            Err(AppError::RateLimited {
                reset_at: decision.reset_at,
            })
        }
    }
}

/// Caller identity for rate-limit keys: first value of `x-forwarded-for`,
/// else a literal "unknown".
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryCounterStore::new()))
    }

    #[tokio::test]
    async fn admits_up_to_max_then_denies() {
        let limiter = limiter();
        let now = 1_000_000;
        for i in 0..5u32 {
            let d = limiter.allow_at("login:1.2.3.4", MINUTE_MS, 5, now + i as i64).await;
            assert!(d.success, "request {i} should be admitted");
            assert_eq!(d.remaining, 4 - i);
        }
        let denied = limiter.allow_at("login:1.2.3.4", MINUTE_MS, 5, now + 10).await;
        assert!(!denied.success);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at, (now + MINUTE_MS) / 1000);
    }

    #[tokio::test]
    async fn window_slides_past_oldest_entry() {
        let limiter = limiter();
        let now = 1_000_000;
        for i in 0..3 {
            assert!(limiter.allow_at("k", MINUTE_MS, 3, now + i).await.success);
        }
        assert!(!limiter.allow_at("k", MINUTE_MS, 3, now + 100).await.success);
        // Past the window from the first request, capacity frees up.
        let later = now + MINUTE_MS + 1;
        assert!(limiter.allow_at("k", MINUTE_MS, 3, later).await.success);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = limiter();
        let now = 5_000;
        assert!(!limiter.allow_at("a", MINUTE_MS, 0, now).await.success);
        assert!(limiter.allow_at("b", MINUTE_MS, 1, now).await.success);
    }

    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn range_by_score(&self, _: &str, _: i64, _: i64) -> anyhow::Result<Vec<i64>> {
            anyhow::bail!("connection refused")
        }
        async fn add_scored(&self, _: &str, _: i64, _: String) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn remove_range_by_score(&self, _: &str, _: i64, _: i64) -> anyhow::Result<u64> {
            anyhow::bail!("connection refused")
        }
        async fn expire(&self, _: &str, _: u64) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn fails_open_when_store_is_down() {
        let limiter = RateLimiter::new(Arc::new(BrokenStore));
        let decision = limiter.allow("k", MINUTE_MS, 10).await;
        assert!(decision.success);
        assert_eq!(decision.remaining, 10);
    }

    #[test]
    fn client_ip_takes_first_forwarded_value() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), "203.0.113.9");
    }

    #[test]
    fn client_ip_falls_back_to_unknown() {
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }
}
