//! Time-boxed cache for remote reads.
//!
//! Entries belong to a [`TtlClass`]; each class has its own time-to-live so
//! that directory listings (which change whenever content is added or
//! removed) expire sooner than file bodies. Each class is backed by its own
//! [`moka::sync::Cache`], which handles expiry, the optional size bound, and
//! concurrent access.
//!
//! The cache never performs I/O.

use moka::sync::Cache;
use std::time::Duration;

use crate::config::CacheConfig;

/// Key class that selects an entry's time-to-live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    FileContent,
    DirectoryListing,
}

/// Generic key → value cache with per-class expiry.
pub struct ResultCache<V> {
    file_ttl: Duration,
    listing_ttl: Duration,
    files: Cache<String, V>,
    listings: Cache<String, V>,
}

impl<V: Clone + Send + Sync + 'static> ResultCache<V> {
    pub fn new(file_ttl: Duration, listing_ttl: Duration) -> Self {
        Self::build(file_ttl, listing_ttl, None)
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::build(
            Duration::from_secs(config.file_ttl_secs),
            Duration::from_secs(config.listing_ttl_secs),
            config.max_entries,
        )
    }

    /// Bound the entry count of each class. Eviction follows moka's admission
    /// policy, so the bound is approximate until pending tasks run.
    pub fn with_max_entries(self, max_entries: Option<usize>) -> Self {
        Self::build(self.file_ttl, self.listing_ttl, max_entries)
    }

    fn build(file_ttl: Duration, listing_ttl: Duration, max_entries: Option<usize>) -> Self {
        Self {
            file_ttl,
            listing_ttl,
            files: class_cache(file_ttl, max_entries),
            listings: class_cache(listing_ttl, max_entries),
        }
    }

    pub fn ttl(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::FileContent => self.file_ttl,
            TtlClass::DirectoryListing => self.listing_ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.files.get(key).or_else(|| self.listings.get(key))
    }

    pub fn put(&self, key: impl Into<String>, value: V, class: TtlClass) {
        let key = key.into();
        let (target, other) = match class {
            TtlClass::FileContent => (&self.files, &self.listings),
            TtlClass::DirectoryListing => (&self.listings, &self.files),
        };
        other.invalidate(&key);
        target.insert(key, value);
    }

    /// Drop every entry.
    pub fn invalidate_all(&self) {
        self.files.invalidate_all();
        self.listings.invalidate_all();
    }

    /// Drop every entry whose key starts with `prefix`. Returns how many were dropped.
    pub fn invalidate(&self, prefix: &str) -> usize {
        let mut dropped = 0;
        for cache in [&self.files, &self.listings] {
            let keys: Vec<String> = cache
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| (*k).clone())
                .collect();
            for key in &keys {
                cache.invalidate(key);
            }
            dropped += keys.len();
        }
        dropped
    }

    /// Number of live entries across both classes.
    pub fn len(&self) -> usize {
        self.files.run_pending_tasks();
        self.listings.run_pending_tasks();
        (self.files.entry_count() + self.listings.entry_count()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn class_cache<V: Clone + Send + Sync + 'static>(
    ttl: Duration,
    max_entries: Option<usize>,
) -> Cache<String, V> {
    let builder = Cache::builder().time_to_live(ttl);
    match max_entries {
        Some(max) => builder.max_capacity(max.max(1) as u64).build(),
        None => builder.build(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn cache() -> ResultCache<String> {
        ResultCache::new(Duration::from_millis(600), Duration::from_millis(300))
    }

    #[test]
    fn listing_entry_expires_after_its_ttl() {
        let cache = cache();
        cache.put("list:docs", "x".to_string(), TtlClass::DirectoryListing);

        sleep(Duration::from_millis(100));
        assert_eq!(cache.get("list:docs"), Some("x".to_string()));

        sleep(Duration::from_millis(300));
        assert_eq!(cache.get("list:docs"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn classes_have_independent_ttls() {
        let cache = cache();
        cache.put("file:a", "body".to_string(), TtlClass::FileContent);
        cache.put("list:docs", "l".to_string(), TtlClass::DirectoryListing);

        sleep(Duration::from_millis(400));
        assert_eq!(cache.get("file:a"), Some("body".to_string()));
        assert_eq!(cache.get("list:docs"), None);
    }

    #[test]
    fn reinserting_under_another_class_replaces_the_entry() {
        let cache = cache();
        cache.put("k", "file".to_string(), TtlClass::FileContent);
        cache.put("k", "listing".to_string(), TtlClass::DirectoryListing);
        assert_eq!(cache.get("k"), Some("listing".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidate_by_prefix() {
        let cache = cache();
        cache.put("file:docs/a.md", "a".to_string(), TtlClass::FileContent);
        cache.put("file:guides/b.md", "b".to_string(), TtlClass::FileContent);
        cache.put("list:docs", "l".to_string(), TtlClass::DirectoryListing);

        assert_eq!(cache.invalidate("file:"), 2);
        assert_eq!(cache.get("file:docs/a.md"), None);
        assert_eq!(cache.get("list:docs"), Some("l".to_string()));

        cache.invalidate_all();
        assert_eq!(cache.get("list:docs"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn bounded_cache_stays_within_capacity() {
        let cache = ResultCache::<String>::new(Duration::from_secs(60), Duration::from_secs(30))
            .with_max_entries(Some(2));
        for key in ["a", "b", "c", "d"] {
            cache.put(key, key.to_string(), TtlClass::FileContent);
        }
        assert!(cache.len() <= 2);
    }
}
