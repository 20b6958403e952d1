//! Core data models used throughout Sidebar Sync.
//!
//! These types describe the remote files, the content descriptors built from
//! them, the snapshots handed from discovery to rendering, and the events
//! delivered to live observers.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Sort position given to content that declares no usable `order`.
pub const UNORDERED: i64 = 999;

/// Kind of an entry returned by a remote directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Dir,
    Other,
}

impl FileKind {
    /// Map the `type` string used by the GitHub contents API.
    pub fn from_api(kind: &str) -> Self {
        match kind {
            "file" => FileKind::File,
            "dir" => FileKind::Dir,
            _ => FileKind::Other,
        }
    }
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub name: String,
    /// Repository-relative path, e.g. `docs/getting-started.md`.
    pub path: String,
    pub kind: FileKind,
    /// Modification time reported by the remote, when it reports one.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Normalized record of one discovered content file.
///
/// Built fresh on every discovery pass and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentDescriptor {
    pub path: String,
    pub category: String,
    pub title: String,
    pub sort_order: i64,
    pub last_modified: DateTime<Utc>,
    pub target_url: String,
}

/// Point-in-time discovery result.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoverySnapshot {
    /// Descriptors in render order (category order, sort order, title).
    pub items: Vec<ContentDescriptor>,
    /// Stable hash over the fields that affect the rendered index.
    pub fingerprint: String,
    /// Categories skipped this pass because the remote refused or failed them.
    pub skipped_categories: Vec<String>,
    pub taken_at: DateTime<Utc>,
}

impl DiscoverySnapshot {
    /// True when at least one category was skipped.
    pub fn is_partial(&self) -> bool {
        !self.skipped_categories.is_empty()
    }

    /// Descriptors belonging to `category`, in render order.
    pub fn in_category<'a>(
        &'a self,
        category: &'a str,
    ) -> impl Iterator<Item = &'a ContentDescriptor> + 'a {
        self.items.iter().filter(move |d| d.category == category)
    }
}

/// Event delivered to live observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncEvent {
    /// A new navigation index was published.
    IndexUpdated {
        content: String,
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    pub fn index_updated(content: String) -> Self {
        SyncEvent::IndexUpdated {
            content,
            timestamp: Utc::now(),
        }
    }
}
