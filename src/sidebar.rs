//! Sidebar rendering and persistence.
//!
//! [`render`] turns a snapshot into the Docsify `_sidebar.md` document. It is
//! a pure, total function: the same snapshot and layout always produce the
//! same bytes, and an empty snapshot renders the header, home link, and
//! admin section only.
//!
//! ```text
//! <!-- header comment -->
//!
//! * [🏠 Home](/)
//!
//! * 📚 Documentation
//!   * [Getting Started](/docs/getting-started)
//!
//! * 🔧 CMS Admin
//!   * <a href="admin/" target="_self">📝 Content Management</a>
//! ```
//!
//! [`write_atomic`] persists a rendered document by writing a sibling
//! temporary file and renaming it over the target, so readers never observe
//! a half-written sidebar.

use std::path::Path;

use crate::config::{CategoryConfig, Config};
use crate::discovery::sort_descriptors;
use crate::models::{ContentDescriptor, DiscoverySnapshot};

/// Fixed presentation settings for the sidebar.
#[derive(Debug, Clone)]
pub struct SidebarLayout {
    pub header: String,
    pub home: String,
    /// Declared section order and labels.
    pub categories: Vec<CategoryConfig>,
    pub admin: Vec<String>,
}

impl SidebarLayout {
    pub fn from_config(config: &Config) -> Self {
        Self {
            header: config.sidebar.header.clone(),
            home: config.sidebar.home.clone(),
            categories: config.content.categories.clone(),
            admin: config.sidebar.admin.clone(),
        }
    }

    fn label<'a>(&'a self, category: &'a str) -> &'a str {
        self.categories
            .iter()
            .find(|c| c.name == category)
            .map(|c| c.label.as_str())
            .unwrap_or(category)
    }
}

/// Render the sidebar for `snapshot`.
pub fn render(snapshot: &DiscoverySnapshot, layout: &SidebarLayout) -> String {
    let order: Vec<String> = layout.categories.iter().map(|c| c.name.clone()).collect();
    let mut items: Vec<ContentDescriptor> = snapshot.items.clone();
    sort_descriptors(&mut items, &order);

    let mut out = String::new();
    if !layout.header.is_empty() {
        out.push_str(&layout.header);
        out.push_str("\n\n");
    }
    if !layout.home.is_empty() {
        out.push_str(&layout.home);
        out.push_str("\n\n");
    }

    // Items are sorted, so each category forms one contiguous run.
    let mut current: Option<&str> = None;
    for item in &items {
        if current != Some(item.category.as_str()) {
            if current.is_some() {
                out.push('\n');
            }
            out.push_str(&format!("* {}\n", layout.label(&item.category)));
            current = Some(item.category.as_str());
        }
        out.push_str(&format!("  * [{}]({})\n", item.title, item.target_url));
    }
    if current.is_some() {
        out.push('\n');
    }

    for line in &layout.admin {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Replace `path` with `content` atomically.
pub async fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "sidebar".to_string());
    let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&tmp, content).await?;
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;
    use crate::models::UNORDERED;
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;

    fn layout() -> SidebarLayout {
        SidebarLayout {
            header: "<!-- managed -->".to_string(),
            home: "* [Home](/)".to_string(),
            categories: vec![
                CategoryConfig {
                    name: "docs".to_string(),
                    label: "Documentation".to_string(),
                },
                CategoryConfig {
                    name: "guides".to_string(),
                    label: "Guides".to_string(),
                },
                CategoryConfig {
                    name: "tutorials".to_string(),
                    label: "Tutorials".to_string(),
                },
            ],
            admin: vec!["* Admin".to_string(), "  * [CMS](admin/)".to_string()],
        }
    }

    fn item(category: &str, order: i64, title: &str) -> ContentDescriptor {
        let path = format!("{}/{}.md", category, title.to_lowercase());
        ContentDescriptor {
            target_url: format!("/{}", path.trim_end_matches(".md")),
            path,
            category: category.to_string(),
            title: title.to_string(),
            sort_order: order,
            last_modified: DateTime::from_timestamp(0, 0).unwrap(),
        }
    }

    fn snapshot(items: Vec<ContentDescriptor>) -> DiscoverySnapshot {
        DiscoverySnapshot {
            fingerprint: fingerprint(&items),
            items,
            skipped_categories: Vec::new(),
            taken_at: Utc::now(),
        }
    }

    #[test]
    fn renders_sections_in_declared_order() {
        // Deliberately unsorted input.
        let s = snapshot(vec![
            item("guides", UNORDERED, "Z"),
            item("docs", 2, "B"),
            item("docs", 1, "A"),
        ]);
        let out = render(&s, &layout());

        assert_eq!(
            out,
            "<!-- managed -->\n\n\
             * [Home](/)\n\n\
             * Documentation\n  * [A](/docs/a)\n  * [B](/docs/b)\n\n\
             * Guides\n  * [Z](/guides/z)\n\n\
             * Admin\n  * [CMS](admin/)\n"
        );
    }

    #[test]
    fn empty_snapshot_renders_minimal_document() {
        let out = render(&snapshot(Vec::new()), &layout());
        assert_eq!(out, "<!-- managed -->\n\n* [Home](/)\n\n* Admin\n  * [CMS](admin/)\n");
    }

    #[test]
    fn empty_categories_are_omitted() {
        let out = render(&snapshot(vec![item("tutorials", 1, "T")]), &layout());
        assert!(!out.contains("Documentation"));
        assert!(!out.contains("Guides"));
        assert!(out.contains("* Tutorials\n  * [T](/tutorials/t)\n"));
    }

    #[test]
    fn unknown_category_uses_raw_name() {
        let out = render(&snapshot(vec![item("recipes", 1, "Soup")]), &layout());
        assert!(out.contains("* recipes\n  * [Soup](/recipes/soup)\n"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let s = snapshot(vec![
            item("docs", UNORDERED, "b"),
            item("docs", UNORDERED, "A"),
            item("guides", 3, "G"),
        ]);
        let first = render(&s, &layout());
        let second = render(&s, &layout());
        assert_eq!(first, second);
        assert!(first.find("[A]").unwrap() < first.find("[b]").unwrap());
    }

    #[tokio::test]
    async fn write_atomic_replaces_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("site").join("_sidebar.md");

        write_atomic(&path, "first").await.unwrap();
        write_atomic(&path, "second").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }
}
