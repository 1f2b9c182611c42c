use std::sync::atomic::{AtomicI64, Ordering};
use tracing::warn;

/// Fixed-budget token bucket.
///
/// Unlike a windowed rate limiter this bucket never refills: the capacity is
/// the total number of tokens the process will ever hand out. Depletion is
/// therefore a one-way transition, which is exactly what the canary circuit
/// breakers need: once tripped they stay open until restart.
pub struct TokenBucket {
    capacity: u64,
    available: AtomicI64,
}

impl TokenBucket {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            available: AtomicI64::new(capacity as i64),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Tokens currently available. May be stale by the time the caller acts
    /// on it; use `take_available` for the authoritative claim.
    pub fn available(&self) -> i64 {
        self.available.load(Ordering::Relaxed)
    }

    /// Atomically take up to `count` tokens, returning how many were taken.
    /// The available count never goes below zero.
    pub fn take_available(&self, count: u64) -> u64 {
        let mut taken = 0;
        let _ = self
            .available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current <= 0 {
                    taken = 0;
                    return None;
                }
                taken = (current as u64).min(count);
                Some(current - taken as i64)
            });
        taken
    }
}

/// Caps how many requests may ever be routed to canary.
///
/// A `None` bucket means the limiter is disabled (`request-limit-canary = 0`)
/// and every request is admitted.
pub struct RequestLimiter {
    bucket: Option<TokenBucket>,
}

impl RequestLimiter {
    pub fn new(limit: u64) -> Self {
        Self {
            bucket: (limit != 0).then(|| TokenBucket::new(limit)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bucket.is_some()
    }

    /// Cheap pre-check: false once the budget is exhausted. Two callers may
    /// both see `true` here and race on `claim_slot`; the loser routes to
    /// main.
    pub fn should_admit(&self) -> bool {
        match &self.bucket {
            Some(bucket) => bucket.available() > 0,
            None => true,
        }
    }

    /// Claim one canary slot. Returns false when the bucket ran out between
    /// the pre-check and the claim.
    pub fn claim_slot(&self) -> bool {
        match &self.bucket {
            Some(bucket) => bucket.take_available(1) == 1,
            None => true,
        }
    }
}

/// Suspends canary routing after a budget of non-2xx canary responses.
pub struct ErrorLimiter {
    bucket: Option<TokenBucket>,
}

impl ErrorLimiter {
    pub fn new(limit: u64) -> Self {
        Self {
            bucket: (limit != 0).then(|| TokenBucket::new(limit)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bucket.is_some()
    }

    pub fn is_exhausted(&self) -> bool {
        match &self.bucket {
            Some(bucket) => bucket.available() <= 0,
            None => false,
        }
    }

    /// Observe a canary response status. Non-2xx burns one token.
    pub fn observe(&self, status: u16) {
        if !(200..300).contains(&status) {
            if let Some(bucket) = &self.bucket {
                warn!("breaker: canary returned non-2xx, status={}", status);
                if bucket.take_available(1) == 1 && bucket.available() <= 0 {
                    warn!(
                        "breaker: canary error limit reached, capacity={}",
                        bucket.capacity()
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_bucket_counts_down_to_zero() {
        let bucket = TokenBucket::new(3);
        assert_eq!(bucket.available(), 3);
        assert_eq!(bucket.take_available(1), 1);
        assert_eq!(bucket.take_available(1), 1);
        assert_eq!(bucket.take_available(1), 1);
        assert_eq!(bucket.take_available(1), 0);
        assert_eq!(bucket.available(), 0);
    }

    #[test]
    fn test_bucket_partial_take() {
        let bucket = TokenBucket::new(2);
        assert_eq!(bucket.take_available(5), 2);
        assert_eq!(bucket.take_available(5), 0);
    }

    #[test]
    fn test_concurrent_claims_never_exceed_budget() {
        let bucket = Arc::new(TokenBucket::new(50));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let bucket = bucket.clone();
            handles.push(std::thread::spawn(move || {
                let mut taken = 0u64;
                for _ in 0..100 {
                    taken += bucket.take_available(1);
                }
                taken
            }));
        }
        let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 50);
        assert_eq!(bucket.available(), 0);
    }

    #[test]
    fn test_request_limiter_disabled_at_zero() {
        let limiter = RequestLimiter::new(0);
        assert!(!limiter.is_enabled());
        for _ in 0..1000 {
            assert!(limiter.should_admit());
            assert!(limiter.claim_slot());
        }
    }

    #[test]
    fn test_request_limiter_exhausts() {
        let limiter = RequestLimiter::new(2);
        assert!(limiter.is_enabled());
        assert!(limiter.claim_slot());
        assert!(limiter.claim_slot());
        assert!(!limiter.should_admit());
        assert!(!limiter.claim_slot());
    }

    #[test]
    fn test_error_limiter_ignores_2xx() {
        let limiter = ErrorLimiter::new(1);
        limiter.observe(200);
        limiter.observe(204);
        limiter.observe(299);
        assert!(!limiter.is_exhausted());
        limiter.observe(500);
        assert!(limiter.is_exhausted());
    }

    #[test]
    fn test_error_limiter_counts_4xx_and_5xx() {
        let limiter = ErrorLimiter::new(2);
        limiter.observe(404);
        assert!(!limiter.is_exhausted());
        limiter.observe(503);
        assert!(limiter.is_exhausted());
        // Further observations are harmless.
        limiter.observe(500);
        assert!(limiter.is_exhausted());
    }

    #[test]
    fn test_error_limiter_disabled_at_zero() {
        let limiter = ErrorLimiter::new(0);
        for _ in 0..100 {
            limiter.observe(500);
        }
        assert!(!limiter.is_exhausted());
    }
}
