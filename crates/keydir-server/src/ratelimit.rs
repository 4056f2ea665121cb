use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Per-key exponential-backoff rate limiter for signup requests.
///
/// Keys are canonical user names, not client addresses. An allowed request
/// arms the key's bucket for one backoff interval; each denied request
/// returns the wait it imposed and doubles the backoff, up to the cap. A
/// bucket left idle past the cap resets to the initial interval. State
/// lives only in memory, so a restart clears all counters.
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    initial: Duration,
    max: Duration,
}

struct Bucket {
    next: Instant,
    backoff: Duration,
}

impl RateLimiter {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            initial,
            max,
        }
    }

    /// Whether a request for `key` may proceed now, and the wait imposed on
    /// the next one (when allowed) or on this one (when denied).
    pub fn pass(&self, key: &str) -> (bool, Duration) {
        self.pass_at(key, Instant::now())
    }

    fn pass_at(&self, key: &str, now: Instant) -> (bool, Duration) {
        let mut entry = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            next: now,
            backoff: self.initial,
        });
        let bucket = entry.value_mut();
        if now >= bucket.next {
            if now.duration_since(bucket.next) > self.max {
                bucket.backoff = self.initial;
            }
            bucket.next = now + bucket.backoff;
            (true, bucket.backoff)
        } else {
            let wait = bucket.backoff;
            bucket.next = now + wait;
            bucket.backoff = (bucket.backoff * 2).min(self.max);
            (false, wait)
        }
    }
}
