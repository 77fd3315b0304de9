//! Sliding window admission control keyed by client identity.
//!
//! Each client owns a bucket holding the timestamps of its admitted
//! requests inside the current window. Buckets are pruned lazily on every
//! check, and idle buckets are dropped by the retention sweeper.
//!
//! Lookups take the outer map's read lock, so different clients never
//! contend; each bucket has its own mutex serializing its updates.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::config::RateLimitConfig;

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request admitted and recorded.
    Allowed {
        /// Requests still available in the current window.
        remaining: usize,
    },
    /// Request denied, nothing recorded.
    Denied {
        /// Time until the oldest recorded request leaves the window.
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

#[derive(Debug, Default)]
struct Bucket {
    hits: VecDeque<Instant>,
}

impl Bucket {
    /// Drop timestamps that have left the window ending at `now`.
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-client sliding window rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: RwLock<FxHashMap<String, Mutex<Bucket>>>,
}

fn lock_bucket(bucket: &Mutex<Bucket>) -> MutexGuard<'_, Bucket> {
    bucket.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check and record one request from `client` at `now`.
    pub fn admit(&self, client: &str, now: Instant) -> Admission {
        if !self.config.enabled {
            return Admission::Allowed {
                remaining: self.config.max_requests,
            };
        }

        // Fast path: existing bucket, shared lock on the map
        {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(bucket) = buckets.get(client) {
                return self.check(&mut lock_bucket(bucket), now);
            }
        }

        // Slow path: create the bucket (another thread may have beaten us)
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets.entry(client.to_string()).or_default();
        self.check(&mut lock_bucket(bucket), now)
    }

    fn check(&self, bucket: &mut Bucket, now: Instant) -> Admission {
        let window = self.config.window;
        bucket.prune(now, window);

        if bucket.hits.len() < self.config.max_requests {
            bucket.hits.push_back(now);
            return Admission::Allowed {
                remaining: self.config.max_requests - bucket.hits.len(),
            };
        }

        let retry_after = match bucket.hits.front() {
            Some(&oldest) => window.saturating_sub(now.saturating_duration_since(oldest)),
            None => window,
        };
        Admission::Denied { retry_after }
    }

    /// Drop buckets with no requests left in their window.
    ///
    /// Returns how many were removed. An absent bucket behaves exactly like
    /// an empty one, so this never changes an admission decision.
    pub fn prune_idle(&self, now: Instant) -> usize {
        let window = self.config.window;
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            let bucket = bucket.get_mut().unwrap_or_else(PoisonError::into_inner);
            bucket.prune(now, window);
            !bucket.hits.is_empty()
        });
        before - buckets.len()
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
