//! Classification of inbound GitHub webhook deliveries.
//!
//! A delivery is *relevant* when it is one of:
//!
//! - a push whose `ref` equals the configured ref
//! - any delivery with the `x-github-event: push` header
//! - a closed pull request with `merged: true`
//! - a release with `action: published`
//!
//! A relevant delivery *changes content* when its `commits` touch at least one
//! file matched by the content globs. Deliveries without `commits` (merges,
//! releases) always count as content changes.

use anyhow::Result;
use globset::GlobSet;
use serde::Deserialize;

use crate::discovery::build_globset;

/// The parts of a webhook payload that drive classification.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub commits: Option<Vec<Commit>>,
    #[serde(default)]
    pub pull_request: Option<PullRequest>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Commit {
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

impl Commit {
    fn paths(&self) -> impl Iterator<Item = &str> {
        self.added
            .iter()
            .chain(&self.modified)
            .chain(&self.removed)
            .map(String::as_str)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PullRequest {
    #[serde(default)]
    pub merged: bool,
}

/// Outcome of classifying one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub relevant: bool,
    pub content_changed: bool,
}

impl Classification {
    /// Whether the delivery should trigger a change notification.
    pub fn should_sync(&self) -> bool {
        self.relevant && self.content_changed
    }
}

/// Decides which webhook deliveries affect content.
pub struct WebhookClassifier {
    watched_ref: String,
    content: GlobSet,
}

impl WebhookClassifier {
    pub fn new(watched_ref: &str, include_globs: &[String]) -> Result<Self> {
        Ok(Self {
            watched_ref: watched_ref.to_string(),
            content: build_globset(include_globs)?,
        })
    }

    pub fn classify(&self, event: Option<&str>, payload: &WebhookPayload) -> Classification {
        let ref_push = payload.git_ref.as_deref() == Some(self.watched_ref.as_str());
        let merged = payload.action.as_deref() == Some("closed")
            && payload.pull_request.as_ref().is_some_and(|pr| pr.merged);
        let published = payload.action.as_deref() == Some("published");
        let push_event = event == Some("push");

        let relevant = ref_push || merged || published || push_event;
        let content_changed = match &payload.commits {
            Some(commits) => {
                merged
                    || published
                    || commits
                        .iter()
                        .flat_map(Commit::paths)
                        .any(|path| self.is_content(path))
            }
            None => true,
        };

        Classification {
            relevant,
            content_changed,
        }
    }

    fn is_content(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);
        self.content.is_match(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classifier() -> WebhookClassifier {
        WebhookClassifier::new("refs/heads/main", &["*.md".to_string()]).unwrap()
    }

    fn payload(value: serde_json::Value) -> WebhookPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn push_touching_markdown_syncs() {
        let p = payload(json!({
            "ref": "refs/heads/main",
            "commits": [
                { "added": [], "modified": ["src/app.js"], "removed": [] },
                { "added": ["docs/new-page.md"] }
            ]
        }));
        let c = classifier().classify(Some("push"), &p);
        assert!(c.relevant);
        assert!(c.should_sync());
    }

    #[test]
    fn push_without_content_files_is_ignored() {
        let p = payload(json!({
            "ref": "refs/heads/main",
            "commits": [{ "modified": ["package.json", "docs/logo.png"] }]
        }));
        let c = classifier().classify(Some("push"), &p);
        assert!(c.relevant);
        assert!(!c.content_changed);
        assert!(!c.should_sync());
    }

    #[test]
    fn removed_content_counts_as_change() {
        let p = payload(json!({
            "ref": "refs/heads/main",
            "commits": [{ "removed": ["guides/old.md"] }]
        }));
        assert!(classifier().classify(None, &p).should_sync());
    }

    #[test]
    fn merged_pull_request_syncs_without_commits() {
        let p = payload(json!({
            "action": "closed",
            "pull_request": { "merged": true }
        }));
        assert!(classifier().classify(Some("pull_request"), &p).should_sync());
    }

    #[test]
    fn closed_unmerged_pull_request_is_not_relevant() {
        let p = payload(json!({
            "action": "closed",
            "pull_request": { "merged": false }
        }));
        let c = classifier().classify(Some("pull_request"), &p);
        assert!(!c.relevant);
        assert!(!c.should_sync());
    }

    #[test]
    fn published_release_syncs() {
        let p = payload(json!({ "action": "published" }));
        assert!(classifier().classify(Some("release"), &p).should_sync());
    }

    #[test]
    fn push_to_other_branch_is_relevant_via_event_header_only() {
        let p = payload(json!({
            "ref": "refs/heads/feature",
            "commits": [{ "added": ["docs/x.md"] }]
        }));
        assert!(!classifier().classify(None, &p).relevant);
        assert!(classifier().classify(Some("push"), &p).should_sync());
    }

    #[test]
    fn unrelated_events_are_ignored() {
        let p = payload(json!({ "action": "opened" }));
        assert!(!classifier().classify(Some("issues"), &p).should_sync());
    }
}
