//! # sidebar-sync CLI
//!
//! Keeps a Docsify `_sidebar.md` in sync with Markdown content stored in a
//! GitHub repository.
//!
//! ## Usage
//!
//! ```bash
//! sidebar-sync --config ./config/sidebar-sync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sidebar-sync serve` | Run the HTTP server, poller, and WebSocket feed |
//! | `sidebar-sync sync` | Run one fresh pass and write the sidebar file |
//! | `sidebar-sync content` | List discovered content (`--json` for machine output) |
//! | `sidebar-sync render` | Print the sidebar without writing it |
//!
//! Diagnostics go to stderr through `tracing`; set `RUST_LOG` (default
//! `info`) to change verbosity.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sidebar_sync::{commands, config, server};

/// sidebar-sync: a docs-site navigation sidebar generated from a remote
/// GitHub repository.
#[derive(Parser)]
#[command(
    name = "sidebar-sync",
    about = "Keep a docs-site sidebar in sync with content in a GitHub repository",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/sidebar-sync.toml`. See
    /// `config/sidebar-sync.example.toml` for every setting.
    #[arg(long, global = true, default_value = "./config/sidebar-sync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind`, polls the repository every
    /// `[sync].poll_interval_secs`, and accepts webhooks and manual triggers.
    Serve,

    /// Run one fresh sync pass and write `[sidebar].output`.
    Sync,

    /// List the content that would appear in the sidebar.
    Content {
        /// Print descriptors as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the rendered sidebar to stdout without writing it.
    Render,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Sync => {
            commands::run_sync(&cfg).await?;
        }
        Commands::Content { json } => {
            commands::run_content(&cfg, json).await?;
        }
        Commands::Render => {
            commands::run_render(&cfg).await?;
        }
    }

    Ok(())
}
