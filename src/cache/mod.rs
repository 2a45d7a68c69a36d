//! Ephemeral result cache.
//!
//! [`ResultCache`] maps an opaque handle to a previously fetched record set
//! so that follow-on aggregation calls can reuse it without another round of
//! upstream requests. Entries are write-once: they are never mutated after
//! insertion and expire a fixed TTL later. Expired entries are removed lazily
//! by the lookup that observes them; there is no background sweep.
//!
//! The cache is an owned service instance. Share it with `Arc` and inject a
//! [`ManualClock`] to test expiry.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use crm_query::cache::{ManualClock, ResultCache};
//! use crm_query::types::Record;
//!
//! let clock = Arc::new(ManualClock::default());
//! let cache = ResultCache::new(Duration::from_secs(3600)).with_clock(clock.clone());
//!
//! let handle = cache.insert(vec![Record::new("1", "Cases")]).unwrap();
//! assert!(cache.get(&handle).is_some());
//!
//! clock.advance(chrono::TimeDelta::hours(2));
//! assert!(cache.get(&handle).is_none());
//! ```

mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use crate::types::Record;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Prefix of every cache handle.
pub const HANDLE_PREFIX: &str = "crm_data_";

#[derive(Debug, Clone)]
struct CacheEntry {
    records: Arc<Vec<Record>>,
    expires_at: DateTime<Utc>,
}

/// Handle → record set store with a fixed TTL.
#[derive(Debug)]
pub struct ResultCache {
    entries: DashMap<String, CacheEntry>,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl ResultCache {
    /// Empty cache using the system clock.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: TimeDelta::from_std(ttl).unwrap_or_else(|_| TimeDelta::days(365)),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Store a record set and return its handle.
    ///
    /// Empty record sets are not stored and yield `None`.
    pub fn insert(&self, records: Vec<Record>) -> Option<String> {
        if records.is_empty() {
            return None;
        }
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let count = records.len();
        let entry = CacheEntry {
            records: Arc::new(records),
            expires_at,
        };
        loop {
            let handle = new_handle();
            if let Entry::Vacant(slot) = self.entries.entry(handle.clone()) {
                slot.insert(entry);
                debug!(handle = %handle, records = count, %expires_at, "caching result set");
                return Some(handle);
            }
        }
    }

    /// Look up a record set. Unknown and expired handles yield `None`.
    pub fn get(&self, handle: &str) -> Option<Arc<Vec<Record>>> {
        let now = self.clock.now();
        match self.entries.get(handle) {
            None => return None,
            Some(entry) if now < entry.expires_at => return Some(Arc::clone(&entry.records)),
            Some(_) => {},
        }
        // The read guard is released before removal; DashMap would deadlock otherwise.
        self.entries.remove_if(handle, |_, entry| now >= entry.expires_at);
        debug!(handle, "cache entry expired");
        None
    }

    /// Number of stored entries, including expired ones not yet observed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3_600))
    }
}

fn new_handle() -> String {
    format!("{HANDLE_PREFIX}{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize) -> Vec<Record> {
        (0..n).map(|i| Record::new(i.to_string(), "Cases")).collect()
    }

    fn cache_with_clock() -> (ResultCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = ResultCache::new(Duration::from_secs(3600)).with_clock(clock.clone());
        (cache, clock)
    }

    // ---- insert tests ----

    #[test]
    fn test_insert_returns_prefixed_handle() {
        let (cache, _) = cache_with_clock();
        let handle = cache.insert(records(2)).unwrap();
        assert!(handle.starts_with(HANDLE_PREFIX));
        assert_eq!(handle.len(), HANDLE_PREFIX.len() + 32);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_empty_insert_writes_nothing() {
        let (cache, _) = cache_with_clock();
        assert!(cache.insert(Vec::new()).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_handles_are_unique() {
        let (cache, _) = cache_with_clock();
        let handles: std::collections::HashSet<String> =
            (0..1_000).filter_map(|_| cache.insert(records(1))).collect();
        assert_eq!(handles.len(), 1_000);
        assert_eq!(cache.len(), 1_000);
    }

    #[test]
    fn test_insert_never_replaces_existing_entry() {
        let (cache, _) = cache_with_clock();
        let first = cache.insert(records(2)).unwrap();
        for _ in 0..100 {
            cache.insert(records(5));
        }
        assert_eq!(cache.get(&first).unwrap().len(), 2);
    }

    // ---- expiry tests ----

    #[test]
    fn test_retrievable_before_ttl() {
        let (cache, clock) = cache_with_clock();
        let handle = cache.insert(records(3)).unwrap();
        clock.advance(TimeDelta::seconds(3599));
        assert_eq!(cache.get(&handle).unwrap().len(), 3);
    }

    #[test]
    fn test_not_found_at_and_after_ttl() {
        let (cache, clock) = cache_with_clock();
        let handle = cache.insert(records(1)).unwrap();
        clock.advance(TimeDelta::seconds(3600));
        assert!(cache.get(&handle).is_none());
        assert!(cache.is_empty(), "expired entry removed on lookup");
    }

    #[test]
    fn test_unknown_handle() {
        let (cache, _) = cache_with_clock();
        assert!(cache.get("crm_data_00000000").is_none());
    }

    #[test]
    fn test_expired_entries_linger_until_observed() {
        let (cache, clock) = cache_with_clock();
        let stale = cache.insert(records(1)).unwrap();
        clock.advance(TimeDelta::hours(2));
        let fresh = cache.insert(records(1)).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&fresh).is_some());
        assert!(cache.get(&stale).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear() {
        let (cache, _) = cache_with_clock();
        cache.insert(records(1));
        cache.insert(records(1));
        cache.clear();
        assert!(cache.is_empty());
    }
}
