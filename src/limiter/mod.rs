//! Per-client-IP token bucket rate limiter.
//!
//! # Structure
//!
//! ```text
//!  Mutex<LruCache<client id, Arc<Entry>>>   (structural lock)
//!     │
//!     └── Entry
//!           ├── TokenBucket      (per-bucket lock)
//!           └── last_seen        (timestamp, written under the structural lock)
//! ```
//!
//! - Every request takes the structural lock once to find or create its
//!   entry and move it to the front of the recency list. The bucket check
//!   runs after that lock is released.
//! - Lookup and creation happen under the same lock acquisition, so two
//!   concurrent first requests from one client share a single bucket.
//! - The table never holds more than `max_entries` clients. When a new client
//!   arrives at capacity, the least recently seen client is evicted.
//!
//! # Recency Ordering
//!
//! The list is ordered by touch: the tail is always the client whose last
//! request is the oldest. Eviction pops the tail, and the idle sweep walks
//! from the tail and stops at the first client seen within the window.
//!
//! # Idle Sweep
//!
//! A background task removes clients not seen within `idle_timeout`, every
//! `sweep_interval`. It stops when the shutdown token is cancelled.

mod bucket;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

use crate::metrics;

pub use bucket::TokenBucket;

/// Default requests per minute per client (also the burst size).
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 50;

/// Default maximum number of tracked clients.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Default period between idle sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Default staleness window after which an untouched client is swept.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Invalid rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("requests per minute must be greater than 0; disable rate limiting instead")]
    ZeroRate,

    #[error("maximum tracked clients must be greater than 0")]
    ZeroCapacity,

    #[error("sweep interval must be greater than 0")]
    ZeroSweepInterval,
}

/// Rate limiter settings.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Sustained requests per minute per client; also the burst capacity
    pub requests_per_minute: u32,
    /// Maximum number of clients tracked at once
    pub max_entries: usize,
    /// How often idle clients are swept
    pub sweep_interval: Duration,
    /// How long a client may stay untouched before it is swept
    pub idle_timeout: Duration,
}

impl RateLimitConfig {
    /// Configuration with the given rate and capacity and default sweep timings.
    pub fn new(requests_per_minute: u32, max_entries: usize) -> Self {
        Self {
            requests_per_minute,
            max_entries,
            ..Self::default()
        }
    }

    /// Check the configuration can drive a limiter.
    ///
    /// # Errors
    ///
    /// Returns a [`RateLimitError`] naming the first zero-valued setting.
    pub fn validate(&self) -> Result<(), RateLimitError> {
        if self.requests_per_minute == 0 {
            return Err(RateLimitError::ZeroRate);
        }
        if self.max_entries == 0 {
            return Err(RateLimitError::ZeroCapacity);
        }
        if self.sweep_interval.is_zero() {
            return Err(RateLimitError::ZeroSweepInterval);
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            max_entries: DEFAULT_MAX_ENTRIES,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// One tracked client: its bucket and when it was last seen.
#[derive(Debug)]
struct Entry {
    bucket: TokenBucket,
    /// Nanoseconds since the limiter epoch
    last_seen: AtomicU64,
}

impl Entry {
    fn new(requests_per_minute: u32, now: Instant, stamp: u64) -> Self {
        Self {
            bucket: TokenBucket::new_at(requests_per_minute, now),
            last_seen: AtomicU64::new(stamp),
        }
    }

    #[inline]
    fn touch(&self, stamp: u64) {
        self.last_seen.fetch_max(stamp, Ordering::Relaxed);
    }

    #[inline]
    fn last_seen(&self) -> u64 {
        self.last_seen.load(Ordering::Relaxed)
    }
}

/// Concurrent, capacity-bounded table of per-client token buckets.
#[derive(Debug)]
pub struct IpRateLimiter {
    config: RateLimitConfig,
    entries: Mutex<LruCache<String, Arc<Entry>>>,
    /// Reference point for the compact `last_seen` timestamps
    epoch: Instant,
    shutdown: CancellationToken,
}

impl IpRateLimiter {
    /// Build a limiter. Nothing runs in the background until
    /// [`spawn_sweeper`](Self::spawn_sweeper) is called.
    ///
    /// # Errors
    ///
    /// Returns a [`RateLimitError`] if the configuration is invalid.
    pub fn new(
        config: RateLimitConfig,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>, RateLimitError> {
        config.validate()?;

        Ok(Arc::new(Self {
            config,
            entries: Mutex::new(LruCache::unbounded()),
            epoch: Instant::now(),
            shutdown,
        }))
    }

    /// Limiter settings.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Decide whether a request from `client_id` is admitted.
    pub fn check(&self, client_id: &str) -> bool {
        self.check_at(client_id, Instant::now())
    }

    pub(crate) fn check_at(&self, client_id: &str, now: Instant) -> bool {
        let Some(entry) = self.entry(client_id, now) else {
            // Shutting down: serve in-flight traffic without tracking new clients.
            return true;
        };

        let admitted = entry.bucket.allow_at(now);
        metrics::record_admission(admitted);
        admitted
    }

    /// Find or create the entry for `client_id` and mark it most recently seen.
    ///
    /// Returns `None` when the limiter is shutting down and the client is unknown.
    fn entry(&self, client_id: &str, now: Instant) -> Option<Arc<Entry>> {
        let stamp = self.stamp(now);
        let mut entries = self.entries.lock();

        // `get` moves the entry to the front of the recency list.
        if let Some(entry) = entries.get(client_id) {
            entry.touch(stamp);
            return Some(Arc::clone(entry));
        }

        if self.shutdown.is_cancelled() {
            trace!(client_ip = %client_id, "Limiter shutting down, not tracking new client");
            return None;
        }

        while entries.len() >= self.config.max_entries {
            match entries.pop_lru() {
                Some((evicted, _)) => {
                    metrics::record_eviction();
                    trace!(client_ip = %evicted, "Evicted least recently seen client");
                }
                None => break,
            }
        }

        let entry = Arc::new(Entry::new(self.config.requests_per_minute, now, stamp));
        entries.push(client_id.to_owned(), Arc::clone(&entry));

        debug_assert!(entries.len() <= self.config.max_entries);
        metrics::set_tracked_clients(entries.len());
        Some(entry)
    }

    /// Remove every client not seen within the idle timeout.
    ///
    /// Returns the number of clients removed.
    pub fn sweep_idle(&self) -> usize {
        self.sweep_idle_at(Instant::now())
    }

    pub(crate) fn sweep_idle_at(&self, now: Instant) -> usize {
        let since_epoch = now.saturating_duration_since(self.epoch);
        let Some(cutoff) = since_epoch.checked_sub(self.config.idle_timeout) else {
            return 0;
        };
        let cutoff = u64::try_from(cutoff.as_nanos()).unwrap_or(u64::MAX);

        let mut entries = self.entries.lock();
        let mut removed = 0;

        // Oldest first; everything in front of the first recent client is newer.
        while entries
            .peek_lru()
            .is_some_and(|(_, entry)| entry.last_seen() <= cutoff)
        {
            entries.pop_lru();
            removed += 1;
        }

        metrics::record_swept(removed);
        metrics::set_tracked_clients(entries.len());
        removed
    }

    /// Spawn the periodic idle sweep on `tracker`.
    ///
    /// The task exits as soon as the shutdown token is cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, tracker: &TaskTracker) {
        let limiter = Arc::clone(self);
        let cancel = self.shutdown.clone();
        let period = self.config.sweep_interval;

        tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Rate limiter sweep task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = limiter.sweep_idle();
                        debug!(
                            removed,
                            active_ips = limiter.len(),
                            "Rate limiter sweep complete"
                        );
                    }
                }
            }

            debug!("Rate limiter sweep task shutting down");
        });
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no client is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether `client_id` currently has a bucket. Does not affect recency.
    pub fn contains(&self, client_id: &str) -> bool {
        self.entries.lock().contains(client_id)
    }

    /// Token level of a tracked client's bucket at `now`.
    #[cfg(test)]
    fn available_at(&self, client_id: &str, now: Instant) -> Option<f64> {
        self.entries
            .lock()
            .peek(client_id)
            .map(|entry| entry.bucket.available_at(now))
    }

    #[inline]
    fn stamp(&self, at: Instant) -> u64 {
        u64::try_from(at.saturating_duration_since(self.epoch).as_nanos()).unwrap_or(u64::MAX)
    }
}
