//! Sync coordination.
//!
//! [`SyncCoordinator`] is the only component that decides to regenerate the
//! sidebar and the only holder of the current rendered index. Every trigger
//! source (the periodic [`Poller`], manual requests, external change
//! notifications, observers regaining visibility) sends the same request
//! message into one queue, drained by a single worker task:
//!
//! ```text
//!  Poller ──────┐
//!  trigger_sync ┤                ┌───────────────────────────────────────┐
//!  notify ──────┼──▶ queue ──▶  │ Idle → Discovering → Rendering →       │
//!  visibility ──┘                │        Publishing → Idle               │
//!                                └──────────────┬────────────────────────┘
//!                                               ▼
//!                                   write_atomic + Broadcaster
//! ```
//!
//! # Single flight
//!
//! The worker runs one pass at a time. Requests that arrive while a pass is
//! in flight wait in the queue; when the pass ends they are drained together
//! and served by exactly one follow-up pass. A follow-up bypasses the cache
//! if any of the coalesced requests asked for a fresh read.
//!
//! # Failure
//!
//! A failed discovery returns the worker to `Idle` without touching the
//! published index. Callers waiting on the pass get the error; observers
//! get nothing.
//!
//! # Publishing
//!
//! A pass whose fingerprint matches the previous snapshot skips rendering.
//! A rendered index identical to the published one skips the write and the
//! broadcast. A failed write is logged and recorded, but the in-memory index
//! still updates and observers are still notified. Later passes retry the
//! write until the file matches the published index, without notifying
//! observers again.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::broadcast::Broadcaster;
use crate::cache::ResultCache;
use crate::config::Config;
use crate::discovery::ContentDiscovery;
use crate::error::SyncError;
use crate::fingerprint::has_changed;
use crate::models::{DiscoverySnapshot, SyncEvent};
use crate::remote::RemoteStore;
use crate::sidebar::{render, write_atomic, SidebarLayout};

/// Where a sync request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Periodic poller.
    Scheduled,
    /// Explicit caller request; always reads fresh.
    Manual,
    /// Inbound change notification (webhook); clears the cache and reads fresh.
    External,
    /// An observer became visible again.
    Visibility,
}

impl TriggerSource {
    pub fn bypasses_cache(self) -> bool {
        matches!(self, TriggerSource::Manual | TriggerSource::External)
    }
}

/// Coordinator state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Idle,
    Discovering,
    Rendering,
    Publishing,
}

/// Counters kept across passes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    /// Passes started.
    pub passes: u64,
    /// Passes that published a new index.
    pub published: u64,
    /// Passes that found nothing to publish.
    pub unchanged: u64,
    pub failed: u64,
    /// Requests folded into a follow-up pass instead of starting their own.
    pub coalesced: u64,
    pub last_error: Option<String>,
    pub last_published_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of the coordinator, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub stats: SyncStats,
    pub observers: usize,
    pub cached_reads: usize,
    pub fingerprint: Option<String>,
    pub partial: bool,
}

type Reply = oneshot::Sender<Result<String, SyncError>>;

struct SyncRequest {
    source: TriggerSource,
    reply: Option<Reply>,
}

struct State {
    phase: SyncPhase,
    snapshot: Option<Arc<DiscoverySnapshot>>,
    index: Option<String>,
    /// Index last written to `output` successfully.
    persisted: Option<String>,
    stats: SyncStats,
}

struct Shared {
    discovery: ContentDiscovery,
    layout: SidebarLayout,
    broadcaster: Broadcaster,
    output: Option<PathBuf>,
    state: Mutex<State>,
}

/// Handle to the sync worker. Cloning is cheap; the worker exits once every
/// handle is dropped and the queue is drained.
#[derive(Clone)]
pub struct SyncCoordinator {
    shared: Arc<Shared>,
    requests: mpsc::UnboundedSender<SyncRequest>,
}

impl SyncCoordinator {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// `output` is where each published index is persisted; `None` keeps the
    /// index in memory only.
    pub fn start(
        discovery: ContentDiscovery,
        layout: SidebarLayout,
        broadcaster: Broadcaster,
        output: Option<PathBuf>,
    ) -> Self {
        let shared = Arc::new(Shared {
            discovery,
            layout,
            broadcaster,
            output,
            state: Mutex::new(State {
                phase: SyncPhase::Idle,
                snapshot: None,
                index: None,
                persisted: None,
                stats: SyncStats::default(),
            }),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(shared.clone(), rx));
        Self {
            shared,
            requests: tx,
        }
    }

    /// Build the read cache, discovery, and layout from `config` and start.
    ///
    /// With `persist` the published index is written to `[sidebar].output`.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn RemoteStore>,
        persist: bool,
    ) -> anyhow::Result<Self> {
        let cache = Arc::new(ResultCache::from_config(&config.cache));
        let discovery = ContentDiscovery::new(store, cache, &config.content)?;
        let output = persist.then(|| config.sidebar.output.clone());
        Ok(Self::start(
            discovery,
            SidebarLayout::from_config(config),
            Broadcaster::new(),
            output,
        ))
    }

    /// Run a fresh pass (bypassing the cache) and return the resulting index.
    ///
    /// If a pass is already running, this waits for the coalesced follow-up.
    pub async fn trigger_sync(&self) -> Result<String, SyncError> {
        self.request(TriggerSource::Manual).await
    }

    /// Clear the read cache and schedule a fresh pass. Returns once queued.
    pub fn notify_changed(&self) {
        self.shared.discovery.cache().invalidate_all();
        info!("content change notified, cache cleared");
        self.schedule(TriggerSource::External);
    }

    /// Queue a pass without waiting for it.
    pub fn schedule(&self, source: TriggerSource) {
        let request = SyncRequest {
            source,
            reply: None,
        };
        if self.requests.send(request).is_err() {
            warn!(?source, "sync worker stopped, trigger dropped");
        }
    }

    /// The last published index.
    ///
    /// Before anything has been published this waits for one cached pass.
    /// If that pass fails, the minimal document for an empty snapshot is
    /// returned.
    pub async fn current_index(&self) -> String {
        if let Some(index) = self.published_index() {
            return index;
        }
        match self.request(TriggerSource::Scheduled).await {
            Ok(index) => index,
            Err(err) => {
                warn!(error = %err, "no index published yet, serving empty sidebar");
                render(&empty_snapshot(), &self.shared.layout)
            }
        }
    }

    /// The last published index, without waiting.
    pub fn published_index(&self) -> Option<String> {
        self.shared.state().index.clone()
    }

    /// The snapshot behind the current index.
    pub fn current_snapshot(&self) -> Option<Arc<DiscoverySnapshot>> {
        self.shared.state().snapshot.clone()
    }

    pub fn phase(&self) -> SyncPhase {
        self.shared.state().phase
    }

    pub fn stats(&self) -> SyncStats {
        self.shared.state().stats.clone()
    }

    pub fn status(&self) -> SyncStatus {
        let state = self.shared.state();
        SyncStatus {
            phase: state.phase,
            stats: state.stats.clone(),
            observers: self.shared.broadcaster.observer_count(),
            cached_reads: self.shared.discovery.cache().len(),
            fingerprint: state.snapshot.as_ref().map(|s| s.fingerprint.clone()),
            partial: state.snapshot.as_ref().is_some_and(|s| s.is_partial()),
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.shared.broadcaster
    }

    pub fn layout(&self) -> &SidebarLayout {
        &self.shared.layout
    }

    async fn request(&self, source: TriggerSource) -> Result<String, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(SyncRequest {
                source,
                reply: Some(tx),
            })
            .map_err(|_| SyncError::Stopped)?;
        rx.await.map_err(|_| SyncError::Stopped)?
    }
}

fn empty_snapshot() -> DiscoverySnapshot {
    DiscoverySnapshot {
        fingerprint: crate::fingerprint::fingerprint(&[]),
        items: Vec::new(),
        skipped_categories: Vec::new(),
        taken_at: Utc::now(),
    }
}

async fn run_worker(shared: Arc<Shared>, mut requests: mpsc::UnboundedReceiver<SyncRequest>) {
    while let Some(first) = requests.recv().await {
        let mut batch = vec![first];
        while !batch.is_empty() {
            let fresh = batch.iter().any(|r| r.source.bypasses_cache());
            let waiters: Vec<Reply> = batch.drain(..).filter_map(|r| r.reply).collect();

            if fresh {
                shared.discovery.cache().invalidate_all();
            }
            let result = shared.run_pass(!fresh).await;
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }

            // Everything that queued up during the pass shares one follow-up.
            while let Ok(request) = requests.try_recv() {
                batch.push(request);
            }
            if batch.len() > 1 {
                shared.state().stats.coalesced += batch.len() as u64 - 1;
                debug!(requests = batch.len(), "coalesced triggers into one pass");
            }
        }
    }
    debug!("sync worker exiting");
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.state().phase = phase;
    }

    async fn run_pass(&self, use_cache: bool) -> Result<String, SyncError> {
        {
            let mut state = self.state();
            state.phase = SyncPhase::Discovering;
            state.stats.passes += 1;
        }
        debug!(use_cache, "sync pass started");

        let snapshot = match self.discovery.discover(use_cache).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "sync pass failed");
                let mut state = self.state();
                state.phase = SyncPhase::Idle;
                state.stats.failed += 1;
                state.stats.last_error = Some(err.to_string());
                return Err(err);
            }
        };

        let (previous, current) = {
            let state = self.state();
            (state.snapshot.clone(), state.index.clone())
        };
        if let Some(current) = current.as_ref() {
            if !has_changed(&snapshot, previous.as_deref()) {
                debug!("content unchanged, skipping render");
                {
                    let mut state = self.state();
                    state.snapshot = Some(Arc::new(snapshot));
                    state.stats.unchanged += 1;
                }
                self.retry_persist(current).await;
                self.set_phase(SyncPhase::Idle);
                return Ok(current.clone());
            }
        }

        self.set_phase(SyncPhase::Rendering);
        let rendered = render(&snapshot, &self.layout);

        self.set_phase(SyncPhase::Publishing);
        if current.as_deref() == Some(rendered.as_str()) {
            debug!("rendered sidebar identical, skipping publish");
            {
                let mut state = self.state();
                state.snapshot = Some(Arc::new(snapshot));
                state.stats.unchanged += 1;
            }
            self.retry_persist(&rendered).await;
            self.set_phase(SyncPhase::Idle);
            return Ok(rendered);
        }

        self.persist(&rendered).await;

        let items = snapshot.items.len();
        {
            let mut state = self.state();
            state.snapshot = Some(Arc::new(snapshot));
            state.index = Some(rendered.clone());
            state.stats.published += 1;
            state.stats.last_published_at = Some(Utc::now());
        }

        let delivered = self
            .broadcaster
            .publish(&SyncEvent::index_updated(rendered.clone()));
        info!(items, observers = delivered, "sidebar published");

        self.set_phase(SyncPhase::Idle);
        Ok(rendered)
    }
}

impl Shared {
    /// Write `index` to `output`, recording the outcome.
    async fn persist(&self, index: &str) {
        let Some(path) = self.output.as_ref() else {
            return;
        };
        match write_atomic(path, index).await {
            Ok(()) => self.state().persisted = Some(index.to_string()),
            Err(err) => {
                let err = SyncError::WriteFailure {
                    path: path.display().to_string(),
                    message: err.to_string(),
                };
                error!(error = %err, "failed to persist sidebar, keeping previous file");
                self.state().stats.last_error = Some(err.to_string());
            }
        }
    }

    /// Persist an already published index if the last write of it failed.
    async fn retry_persist(&self, index: &str) {
        if self.output.is_none() || self.state().persisted.as_deref() == Some(index) {
            return;
        }
        debug!("retrying sidebar write");
        self.persist(index).await;
    }
}

// ============ Poller ============

/// Periodic trigger. Stopping it schedules no further passes; a pass already
/// running finishes normally.
pub struct Poller {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Poller {
    /// Start ticking every `interval`. The first tick fires immediately.
    pub fn spawn(coordinator: SyncCoordinator, interval: Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => coordinator.schedule(TriggerSource::Scheduled),
                }
            }
            debug!("poller stopped");
        });
        Self { stop, handle }
    }

    /// Stop ticking and wait for the timer task to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}
