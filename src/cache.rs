use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use regex::Regex;

use crate::{util::lock_unpoisoned, ApiError, ApiResponse, Payload, Result};

#[derive(Clone, Debug)]
struct CacheEntry {
    data: ApiResponse<Payload>,
    stored_at: Instant,
    ttl: Duration,
    etag: Option<String>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

/// TTL store of successful GET responses keyed by `METHOD:URL:JSON(params)`.
///
/// Expiry is checked on lookup only; an expired entry stays in memory until
/// its key is looked up again or the cache is cleared.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a live entry, evicting it if it has expired.
    pub fn get(&self, key: &str) -> Option<ApiResponse<Payload>> {
        self.get_at(key, Instant::now())
    }

    pub fn set(&self, key: impl Into<String>, data: ApiResponse<Payload>, ttl: Duration) {
        self.set_at(key.into(), data, ttl, Instant::now());
    }

    /// Entity tag recorded with the entry, if the server sent one.
    pub fn etag(&self, key: &str) -> Option<String> {
        lock_unpoisoned(&self.entries)
            .get(key)
            .and_then(|entry| entry.etag.clone())
    }

    /// Removes every entry, or only keys matching the regular expression
    /// `pattern`. Returns the number of entries removed.
    pub fn clear(&self, pattern: Option<&str>) -> Result<usize> {
        let mut entries = lock_unpoisoned(&self.entries);
        let before = entries.len();
        match pattern {
            None => entries.clear(),
            Some(pattern) => {
                let regex =
                    Regex::new(pattern).map_err(|err| ApiError::InvalidPattern(err.to_string()))?;
                entries.retain(|key, _| !regex.is_match(key));
            }
        }
        Ok(before - entries.len())
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<ApiResponse<Payload>> {
        let mut entries = lock_unpoisoned(&self.entries);
        let entry = entries.get(key)?;
        if entry.is_expired(now) {
            entries.remove(key);
            return None;
        }
        Some(entry.data.clone())
    }

    fn set_at(&self, key: String, data: ApiResponse<Payload>, ttl: Duration, now: Instant) {
        let etag = data.etag();
        lock_unpoisoned(&self.entries).insert(
            key,
            CacheEntry {
                data,
                stored_at: now,
                ttl,
                etag,
            },
        );
    }
}
