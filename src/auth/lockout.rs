//! Server-side login throttling.
//!
//! Failed-login buckets are keyed by (client ip, portal) so a flood of
//! attempts against one portal does not lock out the other. Clearing is
//! an authenticated admin action, not a client-side gesture.

use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

pub struct KeyedRateLimiter {
    limiters: RwLock<HashMap<String, Arc<Limiter>>>,
    quota: Quota,
    cleanup_threshold: usize,
}

impl KeyedRateLimiter {
    /// `burst` attempts available immediately, one restored every
    /// `refill_secs` seconds.
    pub fn new(burst: u32, refill_secs: u64) -> Self {
        let period = Duration::from_secs(refill_secs.max(1));
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN));
        Self {
            limiters: RwLock::new(HashMap::new()),
            quota,
            cleanup_threshold: 10_000,
        }
    }

    /// Consumes one attempt for `key`. Returns false when the bucket is
    /// exhausted.
    pub async fn check(&self, key: &str) -> bool {
        let limiter = {
            let limiters = self.limiters.read().await;
            limiters.get(key).cloned()
        };

        let limiter = match limiter {
            Some(l) => l,
            None => {
                let mut limiters = self.limiters.write().await;
                if limiters.len() > self.cleanup_threshold {
                    limiters.clear();
                }
                limiters
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(RateLimiter::direct(self.quota)))
                    .clone()
            }
        };

        limiter.check().is_ok()
    }

    /// Drops every bucket. Admin override for legitimate users locked
    /// out behind a shared NAT.
    pub async fn clear(&self) {
        self.limiters.write().await.clear();
    }

    pub async fn tracked_keys(&self) -> usize {
        self.limiters.read().await.len()
    }
}

impl std::fmt::Debug for KeyedRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedRateLimiter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_exhausts_then_denies() {
        let limiter = KeyedRateLimiter::new(3, 3600);
        for _ in 0..3 {
            assert!(limiter.check("10.0.0.1:staff").await);
        }
        assert!(!limiter.check("10.0.0.1:staff").await);
    }

    #[tokio::test]
    async fn buckets_are_independent_per_key() {
        let limiter = KeyedRateLimiter::new(1, 3600);
        assert!(limiter.check("10.0.0.1:staff").await);
        assert!(!limiter.check("10.0.0.1:staff").await);
        assert!(limiter.check("10.0.0.1:customer").await);
        assert!(limiter.check("10.0.0.2:staff").await);
    }

    #[tokio::test]
    async fn clear_resets_exhausted_buckets() {
        let limiter = KeyedRateLimiter::new(1, 3600);
        assert!(limiter.check("10.0.0.1:staff").await);
        assert!(!limiter.check("10.0.0.1:staff").await);
        limiter.clear().await;
        assert_eq!(limiter.tracked_keys().await, 0);
        assert!(limiter.check("10.0.0.1:staff").await);
    }
}
