use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::{util::lock_unpoisoned, ApiError, Result};

/// Ceiling of a sliding window: at most `max_requests` per `window`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: usize,
    pub window: Duration,
}

/// Per-URL sliding-window request counter.
///
/// Each key owns the timestamps of requests recorded within the trailing
/// window. Windows are pruned lazily on every check; a key whose window
/// prunes down to nothing is dropped.
#[derive(Debug, Default)]
pub struct SlidingWindowLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects if `key` has already reached the ceiling; records nothing.
    pub fn check(&self, key: &str, limit: RateLimit) -> Result<()> {
        self.check_at(key, limit, Instant::now())
    }

    /// Records one request for `key` without checking the ceiling.
    pub fn track(&self, key: &str) {
        self.track_at(key, Instant::now());
    }

    /// Checks and records in one step under the same lock, so concurrent
    /// callers can never push a window past its ceiling.
    pub fn try_acquire(&self, key: &str, limit: RateLimit) -> Result<()> {
        self.try_acquire_at(key, limit, Instant::now())
    }

    /// Number of URLs with a tracked window.
    pub fn tracker_count(&self) -> usize {
        lock_unpoisoned(&self.windows).len()
    }

    /// Drops every window.
    pub fn reset(&self) {
        lock_unpoisoned(&self.windows).clear();
    }

    fn check_at(&self, key: &str, limit: RateLimit, now: Instant) -> Result<()> {
        let mut windows = lock_unpoisoned(&self.windows);
        let Some(window) = windows.get_mut(key) else {
            return admit(key, &mut VecDeque::new(), limit, now);
        };
        let outcome = admit(key, window, limit, now);
        if window.is_empty() {
            windows.remove(key);
        }
        outcome
    }

    fn track_at(&self, key: &str, now: Instant) {
        lock_unpoisoned(&self.windows)
            .entry(key.to_owned())
            .or_default()
            .push_back(now);
    }

    fn try_acquire_at(&self, key: &str, limit: RateLimit, now: Instant) -> Result<()> {
        let mut windows = lock_unpoisoned(&self.windows);
        let window = windows.entry(key.to_owned()).or_default();
        match admit(key, window, limit, now) {
            Ok(()) => {
                window.push_back(now);
                Ok(())
            }
            Err(err) => {
                if window.is_empty() {
                    windows.remove(key);
                }
                Err(err)
            }
        }
    }
}

fn admit(key: &str, window: &mut VecDeque<Instant>, limit: RateLimit, now: Instant) -> Result<()> {
    prune(window, limit.window, now);
    if window.len() >= limit.max_requests {
        #[cfg(feature = "tracing")]
        tracing::debug!(key, limit = limit.max_requests, "rate limit exceeded");

        return Err(ApiError::RateLimitExceeded {
            key: key.to_owned(),
            limit: limit.max_requests,
            window: limit.window,
        });
    }
    Ok(())
}

fn prune(window: &mut VecDeque<Instant>, size: Duration, now: Instant) {
    // Timestamps are pushed in order, so expired ones are always at the front.
    while window
        .front()
        .is_some_and(|recorded| now.saturating_duration_since(*recorded) >= size)
    {
        window.pop_front();
    }
}
