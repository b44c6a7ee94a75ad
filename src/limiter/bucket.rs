//! Token bucket admission primitive.
//!
//! A bucket holds up to `capacity` tokens and refills continuously at
//! `refill_rate` tokens per second. Each admitted request consumes one token.
//! Token counts are real-valued because refill happens in continuous time.
//!
//! Every bucket carries its own lock, so checks against different buckets
//! never contend with each other.

use parking_lot::Mutex;
use tokio::time::Instant;

/// Mutable part of a bucket, guarded by the bucket's lock.
#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Per-client admission budget.
///
/// Rate and capacity are fixed at construction; only the token level and the
/// refill timestamp change afterwards.
#[derive(Debug)]
pub struct TokenBucket {
    /// Tokens added per second
    refill_rate: f64,
    /// Burst ceiling
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket for the given requests-per-minute budget.
    ///
    /// Capacity equals `requests_per_minute` and the bucket refills at
    /// `requests_per_minute / 60` tokens per second.
    pub fn new(requests_per_minute: u32) -> Self {
        Self::new_at(requests_per_minute, Instant::now())
    }

    pub(crate) fn new_at(requests_per_minute: u32, now: Instant) -> Self {
        let capacity = f64::from(requests_per_minute);
        Self {
            refill_rate: capacity / 60.0,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
        }
    }

    /// Try to take one token now.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Try to take one token at `now`.
    ///
    /// Refills for the time elapsed since the last refill (capped at
    /// capacity), then admits if at least one whole token is available.
    /// A rejection leaves the token level untouched.
    pub fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        let admitted = if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        };

        debug_assert!(
            (0.0..=self.capacity).contains(&state.tokens),
            "token level {} outside [0, {}]",
            state.tokens,
            self.capacity
        );
        admitted
    }

    /// Token level at `now`, after refill, without consuming anything.
    pub fn available_at(&self, now: Instant) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        state.tokens
    }

    /// Burst ceiling of this bucket.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        // Callers may capture `now` before another caller takes the lock, so
        // time observed here can lag behind `last_refill`.
        if now <= state.last_refill {
            return;
        }
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_new_bucket_starts_full() {
        let now = Instant::now();
        let bucket = TokenBucket::new_at(30, now);

        assert_eq!(bucket.capacity(), 30.0);
        assert_eq!(bucket.refill_rate(), 0.5);
        assert_eq!(bucket.available_at(now), 30.0);
    }

    #[test]
    fn test_burst_then_reject() {
        let now = Instant::now();
        let bucket = TokenBucket::new_at(3, now);

        assert!(bucket.allow_at(now));
        assert!(bucket.allow_at(now));
        assert!(bucket.allow_at(now));
        assert!(!bucket.allow_at(now));
        assert!(!bucket.allow_at(now));
    }

    #[test]
    fn test_rejection_leaves_tokens_unchanged() {
        let now = Instant::now();
        let bucket = TokenBucket::new_at(1, now);

        assert!(bucket.allow_at(now));
        let before = bucket.available_at(now);
        assert!(!bucket.allow_at(now));
        assert_eq!(bucket.available_at(now), before);
    }

    #[test]
    fn test_refill_over_time() {
        let start = Instant::now();
        // 60 rpm = 1 token per second
        let bucket = TokenBucket::new_at(60, start);
        for _ in 0..60 {
            assert!(bucket.allow_at(start));
        }
        assert!(!bucket.allow_at(start));

        let later = start + Duration::from_millis(2500);
        assert!((bucket.available_at(later) - 2.5).abs() < 1e-9);
        assert!(bucket.allow_at(later));
        assert!(bucket.allow_at(later));
        assert!(!bucket.allow_at(later));
    }

    #[test]
    fn test_refill_capped_at_capacity() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(10, start);
        assert!(bucket.allow_at(start));

        let much_later = start + Duration::from_secs(3600);
        assert_eq!(bucket.available_at(much_later), 10.0);
    }

    #[test]
    fn test_stale_timestamp_does_not_rewind() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(60, start);
        let later = start + Duration::from_secs(1);

        assert!(bucket.allow_at(later));
        // An older `now` adds nothing and is still admitted from the remaining budget.
        assert!(bucket.allow_at(start));
        assert!((bucket.available_at(later) - 58.0).abs() < 1e-9);
    }
}
