//! # sidebar-sync
//!
//! Keeps a documentation site's navigation sidebar in sync with Markdown
//! content stored in a remote Git repository.
//!
//! Content lives in one folder per category (`docs/`, `tutorials/`,
//! `guides/`). Each file may open with a `---` front-matter block carrying
//! `title`, `order`, and `date`. A sync pass lists those folders through the
//! GitHub contents API, reads each file's metadata, and renders the Docsify
//! `_sidebar.md`. Passes are triggered by a timer, by explicit requests, by
//! webhooks, and by observers regaining visibility; they never overlap.
//!
//! ## Architecture
//!
//! ```text
//!                ┌────────────┐   ┌─────────────┐   ┌─────────────┐
//!  triggers ───▶ │ Coordinator│──▶│  Discovery  │──▶│ RemoteStore │
//!  (poller,      │ single     │   │ front matter│   │ GitHub API  │
//!   webhook,     │ flight     │   └──────┬──────┘   └─────────────┘
//!   manual,      └─────┬──────┘          │ ResultCache (TTL)
//!   visibility)        │ fingerprint changed?
//!                      ▼
//!               ┌─────────────┐   ┌──────────────┐
//!               │   Sidebar   │──▶│  Broadcaster │──▶ WebSocket observers
//!               │ render+write│   └──────────────┘
//!               └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Remote and sync error types |
//! | [`remote`] | Remote store trait, GitHub client, in-memory store |
//! | [`cache`] | TTL cache for remote reads |
//! | [`frontmatter`] | Front-matter parsing and composition |
//! | [`discovery`] | Content discovery across categories |
//! | [`fingerprint`] | Change detection |
//! | [`sidebar`] | Sidebar rendering and atomic persistence |
//! | [`broadcast`] | Fan-out to live observers |
//! | [`coordinator`] | Single-flight sync worker and poller |
//! | [`webhook`] | GitHub webhook classification |
//! | [`server`] | HTTP and WebSocket surface |
//! | [`commands`] | One-shot CLI commands |

pub mod broadcast;
pub mod cache;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod fingerprint;
pub mod frontmatter;
pub mod models;
pub mod remote;
pub mod server;
pub mod sidebar;
pub mod webhook;
