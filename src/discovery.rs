//! Content discovery.
//!
//! Walks the configured categories in declared order. For each category the
//! directory listing is fetched, entries are filtered to content files with
//! the include globs, and every matching file is read and turned into a
//! [`ContentDescriptor`]. Reads go through the shared [`ResultCache`] unless
//! the caller asks for a fresh pass; fresh results refill the cache either way.
//! The coordinator clears the cache before every fresh pass.
//!
//! # Failure policy
//!
//! | Failure | Effect |
//! |---------|--------|
//! | file read fails (any reason) | file skipped, logged |
//! | listing `NotFound` | category is empty this pass |
//! | listing `RateLimited` | category skipped, snapshot marked partial |
//! | listing `Unreachable` | pass aborted |
//! | every category skipped | pass aborted |
//!
//! File reads within a category run as concurrent tasks; the remote store's
//! rate limiter bounds how many are actually in flight.

use anyhow::Result;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::{ResultCache, TtlClass};
use crate::config::ContentConfig;
use crate::error::{RemoteError, SyncError};
use crate::fingerprint::fingerprint;
use crate::frontmatter;
use crate::models::{ContentDescriptor, DiscoverySnapshot, FileKind, FileRef, UNORDERED};
use crate::remote::RemoteStore;

/// A cached remote read.
#[derive(Debug, Clone)]
pub enum CachedRead {
    Listing(Arc<Vec<FileRef>>),
    File(Arc<[u8]>),
}

pub type ReadCache = ResultCache<CachedRead>;

fn listing_key(path: &str) -> String {
    format!("list:{}", path)
}

fn file_key(path: &str) -> String {
    format!("file:{}", path)
}

/// Discovers content across the configured categories.
pub struct ContentDiscovery {
    store: Arc<dyn RemoteStore>,
    cache: Arc<ReadCache>,
    categories: Vec<String>,
    include: GlobSet,
}

impl ContentDiscovery {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        cache: Arc<ReadCache>,
        content: &ContentConfig,
    ) -> Result<Self> {
        Ok(Self {
            store,
            cache,
            categories: content.category_names(),
            include: build_globset(&content.include_globs)?,
        })
    }

    pub fn cache(&self) -> &Arc<ReadCache> {
        &self.cache
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Run one discovery pass.
    pub async fn discover(&self, use_cache: bool) -> Result<DiscoverySnapshot, SyncError> {
        let taken_at = Utc::now();
        let mut items = Vec::new();
        let mut skipped = Vec::new();
        let mut seen = HashSet::new();

        for category in &self.categories {
            let listing = match self.list(category, use_cache).await {
                Ok(listing) => listing,
                Err(RemoteError::NotFound(_)) => {
                    debug!(%category, "category directory missing");
                    continue;
                }
                Err(RemoteError::RateLimited(msg)) => {
                    warn!(%category, error = %msg, "category skipped: rate limited");
                    skipped.push(category.clone());
                    continue;
                }
                Err(err @ RemoteError::Unreachable(_)) => {
                    warn!(%category, error = %err, "discovery aborted");
                    return Err(err.into());
                }
            };

            let files: Vec<FileRef> = listing
                .iter()
                .filter(|f| f.kind == FileKind::File && self.include.is_match(&f.name))
                .filter(|f| seen.insert(f.path.clone()))
                .cloned()
                .collect();

            let mut reads = JoinSet::new();
            for file in files {
                let store = self.store.clone();
                let cache = self.cache.clone();
                reads.spawn(async move {
                    let body = read_file(store.as_ref(), &cache, &file.path, use_cache).await;
                    (file, body)
                });
            }

            while let Some(joined) = reads.join_next().await {
                match joined {
                    Ok((file, Ok(bytes))) => {
                        let text = String::from_utf8_lossy(&bytes);
                        items.push(describe(&file, category, &text, taken_at));
                    }
                    Ok((file, Err(err))) => {
                        warn!(path = %file.path, error = %err, "skipping file");
                    }
                    Err(err) => {
                        warn!(%category, error = %err, "file read task failed");
                    }
                }
            }
        }

        if !self.categories.is_empty() && skipped.len() == self.categories.len() {
            return Err(SyncError::NoCategories(skipped.len()));
        }

        sort_descriptors(&mut items, &self.categories);
        let snapshot = DiscoverySnapshot {
            fingerprint: fingerprint(&items),
            items,
            skipped_categories: skipped,
            taken_at,
        };
        info!(
            items = snapshot.items.len(),
            partial = snapshot.is_partial(),
            fingerprint = %&snapshot.fingerprint[..12],
            "discovery complete"
        );
        Ok(snapshot)
    }

    async fn list(&self, path: &str, use_cache: bool) -> Result<Arc<Vec<FileRef>>, RemoteError> {
        let key = listing_key(path);
        if use_cache {
            if let Some(CachedRead::Listing(listing)) = self.cache.get(&key) {
                return Ok(listing);
            }
        }
        let listing = Arc::new(self.store.list_directory(path).await?);
        self.cache.put(
            key,
            CachedRead::Listing(listing.clone()),
            TtlClass::DirectoryListing,
        );
        Ok(listing)
    }
}

async fn read_file(
    store: &dyn RemoteStore,
    cache: &ReadCache,
    path: &str,
    use_cache: bool,
) -> Result<Arc<[u8]>, RemoteError> {
    let key = file_key(path);
    if use_cache {
        if let Some(CachedRead::File(bytes)) = cache.get(&key) {
            return Ok(bytes);
        }
    }
    let bytes: Arc<[u8]> = store.read_file(path).await?.into();
    cache.put(key, CachedRead::File(bytes.clone()), TtlClass::FileContent);
    Ok(bytes)
}

/// Build the descriptor for one file.
///
/// Fallbacks: no `title` → title from the file name; no numeric `order` →
/// [`UNORDERED`]; no parseable `date` → the remote's modification time, or
/// `fallback_time` when the remote reports none.
pub fn describe(
    file: &FileRef,
    category: &str,
    content: &str,
    fallback_time: DateTime<Utc>,
) -> ContentDescriptor {
    let meta = frontmatter::parse(content);
    ContentDescriptor {
        path: file.path.clone(),
        category: category.to_string(),
        title: meta
            .title()
            .map(str::to_string)
            .unwrap_or_else(|| title_from_filename(&file.name)),
        sort_order: meta.order().unwrap_or(UNORDERED),
        last_modified: meta.date().or(file.updated_at).unwrap_or(fallback_time),
        target_url: target_url(&file.path),
    }
}

/// `getting-started.md` → `getting started`.
pub fn title_from_filename(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());
    stem.replace('-', " ")
}

/// `docs/intro.md` → `/docs/intro`.
pub fn target_url(path: &str) -> String {
    let without_ext = Path::new(path).with_extension("");
    format!("/{}", without_ext.to_string_lossy().trim_start_matches('/'))
}

/// Order by declared category position, then sort order, then title
/// (case-insensitive), with path as the final tie-break. Categories missing
/// from `category_order` sort after the declared ones, by name.
pub fn sort_descriptors(items: &mut [ContentDescriptor], category_order: &[String]) {
    let rank = |category: &str| {
        category_order
            .iter()
            .position(|c| c == category)
            .unwrap_or(usize::MAX)
    };
    items.sort_by(|a, b| {
        rank(&a.category)
            .cmp(&rank(&b.category))
            .then_with(|| a.category.cmp(&b.category))
            .then_with(|| a.sort_order.cmp(&b.sort_order))
            .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
            .then_with(|| a.title.cmp(&b.title))
            .then_with(|| a.path.cmp(&b.path))
    });
}

/// Build a [`GlobSet`] from a list of glob pattern strings.
pub(crate) fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryStore;
    use std::time::Duration;

    fn discovery(store: Arc<MemoryStore>) -> ContentDiscovery {
        let cache = Arc::new(ReadCache::new(
            Duration::from_secs(60),
            Duration::from_secs(30),
        ));
        ContentDiscovery::new(store, cache, &ContentConfig::default()).unwrap()
    }

    fn titles(snapshot: &DiscoverySnapshot) -> Vec<&str> {
        snapshot.items.iter().map(|d| d.title.as_str()).collect()
    }

    #[tokio::test]
    async fn orders_by_category_then_order_then_title() {
        let store = Arc::new(MemoryStore::with_files(&[
            ("guides/z.md", "---\ntitle: Z\n---\n"),
            ("docs/b.md", "---\ntitle: B\norder: 2\n---\n"),
            ("docs/a.md", "---\ntitle: A\norder: 1\n---\n"),
            ("docs/c.md", "---\ntitle: c\n---\n"),
            ("docs/d.md", "---\ntitle: D\n---\n"),
        ]));
        let snapshot = discovery(store).discover(true).await.unwrap();

        assert_eq!(titles(&snapshot), vec!["A", "B", "c", "D", "Z"]);
        assert!(!snapshot.is_partial());
        assert_eq!(snapshot.items[4].category, "guides");
    }

    #[tokio::test]
    async fn rate_limited_category_is_skipped_not_fatal() {
        let store = Arc::new(MemoryStore::with_files(&[
            ("docs/one.md", "---\ntitle: One\n---\n"),
            ("docs/two.md", "---\ntitle: Two\n---\n"),
            ("tutorials/t.md", "---\ntitle: T\n---\n"),
        ]));
        store.fail_listing("tutorials", RemoteError::RateLimited("tutorials".into()));

        let snapshot = discovery(store).discover(true).await.unwrap();
        assert_eq!(titles(&snapshot), vec!["One", "Two"]);
        assert!(snapshot.items.iter().all(|d| d.category == "docs"));
        assert_eq!(snapshot.skipped_categories, vec!["tutorials"]);
    }

    #[tokio::test]
    async fn every_category_rate_limited_aborts() {
        let store = Arc::new(MemoryStore::new());
        for dir in ["docs", "tutorials", "guides"] {
            store.fail_listing(dir, RemoteError::RateLimited(dir.into()));
        }
        let err = discovery(store).discover(true).await.unwrap_err();
        assert_eq!(err, SyncError::NoCategories(3));
    }

    #[tokio::test]
    async fn unreachable_listing_aborts() {
        let store = Arc::new(MemoryStore::with_files(&[("docs/a.md", "A")]));
        store.fail_listing("guides", RemoteError::Unreachable("timed out".into()));
        let err = discovery(store).discover(true).await.unwrap_err();
        assert!(matches!(err, SyncError::Unreachable(_)));
    }

    #[tokio::test]
    async fn missing_directories_are_empty_categories() {
        let store = Arc::new(MemoryStore::with_files(&[("docs/a.md", "A")]));
        let snapshot = discovery(store).discover(true).await.unwrap();
        assert_eq!(snapshot.items.len(), 1);
        assert!(!snapshot.is_partial());
    }

    #[tokio::test]
    async fn broken_file_is_skipped() {
        let store = Arc::new(MemoryStore::with_files(&[
            ("docs/good.md", "---\ntitle: Good\n---\n"),
            ("docs/bad.md", "---\ntitle: Bad\n---\n"),
        ]));
        store.fail_read("docs/bad.md", RemoteError::Unreachable("reset".into()));
        let snapshot = discovery(store).discover(true).await.unwrap();
        assert_eq!(titles(&snapshot), vec!["Good"]);
    }

    #[tokio::test]
    async fn filters_by_include_globs() {
        let store = Arc::new(MemoryStore::with_files(&[
            ("docs/readme.md", "R"),
            ("docs/diagram.png", "binary"),
        ]));
        let snapshot = discovery(store.clone()).discover(true).await.unwrap();
        assert_eq!(titles(&snapshot), vec!["readme"]);
        assert_eq!(store.read_calls(), 1);
    }

    #[tokio::test]
    async fn cached_pass_skips_remote_and_fresh_pass_does_not() {
        let store = Arc::new(MemoryStore::with_files(&[
            ("docs/a.md", "---\ntitle: A\n---\n"),
            ("tutorials/t.md", "T"),
            ("guides/g.md", "G"),
        ]));
        let discovery = discovery(store.clone());

        discovery.discover(true).await.unwrap();
        assert_eq!(store.listing_calls(), 3);
        assert_eq!(store.read_calls(), 3);

        discovery.discover(true).await.unwrap();
        assert_eq!(store.listing_calls(), 3);
        assert_eq!(store.read_calls(), 3);

        store.put("docs/a.md", "---\ntitle: A (edited)\n---\n");
        let cached = discovery.discover(true).await.unwrap();
        assert_eq!(titles(&cached), vec!["A", "t", "g"]);

        let fresh = discovery.discover(false).await.unwrap();
        assert_eq!(titles(&fresh), vec!["A (edited)", "t", "g"]);
        assert_eq!(store.listing_calls(), 6);
        assert_eq!(store.read_calls(), 6);
    }

    #[test]
    fn describe_falls_back_deterministically() {
        let modified = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let fallback = DateTime::from_timestamp(0, 0).unwrap();
        let file = FileRef {
            name: "getting-started-guide.md".to_string(),
            path: "docs/getting-started-guide.md".to_string(),
            kind: FileKind::File,
            updated_at: Some(modified),
        };

        let plain = describe(&file, "docs", "# no metadata", fallback);
        assert_eq!(plain.title, "getting started guide");
        assert_eq!(plain.sort_order, UNORDERED);
        assert_eq!(plain.last_modified, modified);
        assert_eq!(plain.target_url, "/docs/getting-started-guide");

        let odd = describe(&file, "docs", "---\norder: soon\ndate: 2024-01-02\n---\n", fallback);
        assert_eq!(odd.sort_order, UNORDERED);
        assert_eq!(odd.last_modified.date_naive().to_string(), "2024-01-02");

        let bare = FileRef {
            updated_at: None,
            ..file
        };
        assert_eq!(describe(&bare, "docs", "", fallback).last_modified, fallback);
    }

    #[test]
    fn unknown_categories_sort_last() {
        let mk = |category: &str, title: &str| ContentDescriptor {
            path: format!("{}/{}.md", category, title),
            category: category.to_string(),
            title: title.to_string(),
            sort_order: UNORDERED,
            last_modified: Utc::now(),
            target_url: String::new(),
        };
        let mut items = vec![mk("zeta", "a"), mk("guides", "b"), mk("alpha", "c"), mk("docs", "d")];
        sort_descriptors(&mut items, &["docs".to_string(), "guides".to_string()]);
        let order: Vec<&str> = items.iter().map(|d| d.category.as_str()).collect();
        assert_eq!(order, vec!["docs", "guides", "alpha", "zeta"]);
    }
}
