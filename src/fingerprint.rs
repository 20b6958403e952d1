//! Change detection over discovery snapshots.
//!
//! The fingerprint covers only the fields that reach the rendered sidebar
//! (category, path, title, sort order), so two passes that differ only in
//! fetch or modification timestamps compare equal.

use sha2::{Digest, Sha256};

use crate::models::{ContentDescriptor, DiscoverySnapshot};

/// SHA-256 (hex) over the render-relevant fields of `items`, in order.
pub fn fingerprint(items: &[ContentDescriptor]) -> String {
    let mut hasher = Sha256::new();
    for item in items {
        hasher.update(item.category.as_bytes());
        hasher.update([0u8]);
        hasher.update(item.path.as_bytes());
        hasher.update([0u8]);
        hasher.update(item.title.as_bytes());
        hasher.update([0u8]);
        hasher.update(item.sort_order.to_le_bytes());
        hasher.update([b'\n']);
    }
    hex::encode(hasher.finalize())
}

/// Whether `new` warrants regenerating the index relative to `previous`.
///
/// With no previous snapshot there is always something to generate.
pub fn has_changed(new: &DiscoverySnapshot, previous: Option<&DiscoverySnapshot>) -> bool {
    match previous {
        Some(prev) => prev.fingerprint != new.fingerprint,
        None => true,
    }
}
