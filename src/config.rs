use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub remote: RemoteConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub sidebar: SidebarConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Name of an environment variable holding an access token for reads.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_requests_per_sec")]
    pub max_requests_per_sec: u32,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_branch() -> String {
    "main".to_string()
}
fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_timeout_secs() -> u64 {
    5
}
fn default_max_requests_per_sec() -> u32 {
    5
}
fn default_max_in_flight() -> usize {
    4
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Reads the access token from `token_env`, if one is configured and set.
    pub fn token(&self) -> Option<String> {
        self.token_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_file_ttl_secs")]
    pub file_ttl_secs: u64,
    #[serde(default = "default_listing_ttl_secs")]
    pub listing_ttl_secs: u64,
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file_ttl_secs: default_file_ttl_secs(),
            listing_ttl_secs: default_listing_ttl_secs(),
            max_entries: None,
        }
    }
}

fn default_file_ttl_secs() -> u64 {
    60
}
fn default_listing_ttl_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CategoryConfig {
    /// Directory name in the repository, also the category key.
    pub name: String,
    /// Section heading shown in the sidebar.
    pub label: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryConfig>,
    /// Globs matched against file names inside a category directory.
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            include_globs: default_include_globs(),
        }
    }
}

fn default_categories() -> Vec<CategoryConfig> {
    [
        ("docs", "📚 Documentation"),
        ("tutorials", "🎓 Tutorials"),
        ("guides", "📋 User Guides"),
    ]
    .into_iter()
    .map(|(name, label)| CategoryConfig {
        name: name.to_string(),
        label: label.to_string(),
    })
    .collect()
}

fn default_include_globs() -> Vec<String> {
    vec!["*.md".to_string()]
}

impl ContentConfig {
    pub fn category_names(&self) -> Vec<String> {
        self.categories.iter().map(|c| c.name.clone()).collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SidebarConfig {
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default = "default_header")]
    pub header: String,
    #[serde(default = "default_home")]
    pub home: String,
    #[serde(default = "default_admin_lines")]
    pub admin: Vec<String>,
}

impl Default for SidebarConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            header: default_header(),
            home: default_home(),
            admin: default_admin_lines(),
        }
    }
}

fn default_output() -> PathBuf {
    PathBuf::from("_sidebar.md")
}
fn default_header() -> String {
    "<!-- This sidebar is automatically managed by Decap CMS -->".to_string()
}
fn default_home() -> String {
    "* [🏠 Home](/)".to_string()
}
fn default_admin_lines() -> Vec<String> {
    vec![
        "* 🔧 CMS Admin".to_string(),
        "  * <a href=\"admin/\" target=\"_self\">📝 Content Management</a>".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Seconds between scheduled passes; `0` disables the poller.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    300
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_secs > 0).then(|| Duration::from_secs(self.poll_interval_secs))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Ref whose pushes count as content changes.
    #[serde(default = "default_webhook_ref")]
    pub webhook_ref: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            webhook_ref: default_webhook_ref(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_webhook_ref() -> String {
    "refs/heads/main".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate remote
    if config.remote.owner.trim().is_empty() || config.remote.repo.trim().is_empty() {
        anyhow::bail!("remote.owner and remote.repo must not be empty");
    }
    if config.remote.timeout_secs == 0 {
        anyhow::bail!("remote.timeout_secs must be > 0");
    }
    if config.remote.max_requests_per_sec == 0 {
        anyhow::bail!("remote.max_requests_per_sec must be > 0");
    }
    if config.remote.max_in_flight == 0 {
        anyhow::bail!("remote.max_in_flight must be > 0");
    }

    // Validate cache
    if config.cache.max_entries == Some(0) {
        anyhow::bail!("cache.max_entries must be > 0 when set");
    }

    // Validate content
    if config.content.categories.is_empty() {
        anyhow::bail!("content.categories must list at least one category");
    }
    let mut seen = HashSet::new();
    for category in &config.content.categories {
        if category.name.trim().is_empty() {
            anyhow::bail!("content.categories entries must have a name");
        }
        if !seen.insert(category.name.as_str()) {
            anyhow::bail!("duplicate content category: '{}'", category.name);
        }
    }
    if config.content.include_globs.is_empty() {
        anyhow::bail!("content.include_globs must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse(
            r#"
[remote]
owner = "acme"
repo = "handbook"
"#,
        )
        .unwrap();

        assert_eq!(config.remote.branch, "main");
        assert_eq!(config.remote.timeout_secs, 5);
        assert_eq!(config.cache.file_ttl_secs, 60);
        assert_eq!(config.cache.listing_ttl_secs, 30);
        assert_eq!(
            config.content.category_names(),
            vec!["docs", "tutorials", "guides"]
        );
        assert_eq!(config.sidebar.output, PathBuf::from("_sidebar.md"));
        assert_eq!(
            config.sync.poll_interval(),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn zero_poll_interval_disables_poller() {
        let config = parse(
            r#"
[remote]
owner = "acme"
repo = "handbook"

[sync]
poll_interval_secs = 0
"#,
        )
        .unwrap();
        assert_eq!(config.sync.poll_interval(), None);
    }

    #[test]
    fn rejects_duplicate_categories() {
        let err = parse(
            r#"
[remote]
owner = "acme"
repo = "handbook"

[[content.categories]]
name = "docs"
label = "Docs"

[[content.categories]]
name = "docs"
label = "Again"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate content category"));
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = parse(
            r#"
[remote]
owner = "acme"
repo = "handbook"
timeout_secs = 0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn example_config_is_valid() {
        let config = parse(include_str!("../config/sidebar-sync.example.toml")).unwrap();
        assert_eq!(config.remote.token_env.as_deref(), Some("GITHUB_TOKEN"));
        assert_eq!(config.content.categories[1].label, "🎓 Tutorials");
        assert_eq!(config.server.webhook_ref, "refs/heads/main");
        assert_eq!(config.sidebar.admin.len(), 2);
    }
}
