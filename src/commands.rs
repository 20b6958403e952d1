//! One-shot CLI commands.
//!
//! Each command has a core function returning structured data, used by the
//! tests and by callers embedding the library, and a `run_*` wrapper that
//! prints for the terminal.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::coordinator::SyncCoordinator;
use crate::models::ContentDescriptor;
use crate::remote::{GitHubStore, RemoteStore};

/// Result of a forced sync pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub items: usize,
    /// Non-empty categories as `(label, count)`, in sidebar order.
    pub categories: Vec<(String, usize)>,
    pub skipped: Vec<String>,
    pub output: PathBuf,
    pub write_error: Option<String>,
}

/// Run one fresh pass and persist the sidebar to `[sidebar].output`.
pub async fn sync_once(config: &Config, store: Arc<dyn RemoteStore>) -> Result<SyncSummary> {
    let coordinator = SyncCoordinator::from_config(config, store, true)?;
    coordinator
        .trigger_sync()
        .await
        .context("sync pass failed")?;
    let snapshot = coordinator
        .current_snapshot()
        .context("sync pass produced no snapshot")?;

    let categories = coordinator
        .layout()
        .categories
        .iter()
        .map(|c| (c.label.clone(), snapshot.in_category(&c.name).count()))
        .filter(|(_, count)| *count > 0)
        .collect();

    Ok(SyncSummary {
        items: snapshot.items.len(),
        categories,
        skipped: snapshot.skipped_categories.clone(),
        output: config.sidebar.output.clone(),
        write_error: coordinator.stats().last_error,
    })
}

/// Discover content without rendering.
pub async fn discover_content(
    config: &Config,
    store: Arc<dyn RemoteStore>,
) -> Result<Vec<ContentDescriptor>> {
    let coordinator = SyncCoordinator::from_config(config, store, false)?;
    coordinator.trigger_sync().await.context("discovery failed")?;
    Ok(coordinator
        .current_snapshot()
        .map(|s| s.items.clone())
        .unwrap_or_default())
}

/// Render the sidebar without writing it.
pub async fn render_index(config: &Config, store: Arc<dyn RemoteStore>) -> Result<String> {
    let coordinator = SyncCoordinator::from_config(config, store, false)?;
    coordinator.trigger_sync().await.context("sync pass failed")
}

fn github(config: &Config) -> Result<Arc<dyn RemoteStore>> {
    Ok(Arc::new(GitHubStore::new(&config.remote)?))
}

/// `sidebar-sync sync`
pub async fn run_sync(config: &Config) -> Result<()> {
    let summary = sync_once(config, github(config)?).await?;

    println!(
        "Synced {} items from {}/{}@{}",
        summary.items, config.remote.owner, config.remote.repo, config.remote.branch
    );
    for (label, count) in &summary.categories {
        println!("  {:<28} {}", label, count);
    }
    if !summary.skipped.is_empty() {
        println!("  skipped (rate limited): {}", summary.skipped.join(", "));
    }
    match &summary.write_error {
        Some(err) => println!("Sidebar NOT written: {}", err),
        None => println!("Wrote {}", summary.output.display()),
    }
    Ok(())
}

/// `sidebar-sync content [--json]`
pub async fn run_content(config: &Config, json: bool) -> Result<()> {
    let items = discover_content(config, github(config)?).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    if items.is_empty() {
        println!("No content found.");
        return Ok(());
    }
    for item in &items {
        println!(
            "{:<12} {:>5}  {:<40} {}",
            item.category, item.sort_order, item.title, item.path
        );
    }
    println!("\n{} items", items.len());
    Ok(())
}

/// `sidebar-sync render`
pub async fn run_render(config: &Config) -> Result<()> {
    let index = render_index(config, github(config)?).await?;
    print!("{}", index);
    Ok(())
}
