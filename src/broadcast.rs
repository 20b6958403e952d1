//! Fan-out of sync events to live observers.
//!
//! Each observer owns a bounded channel. [`Broadcaster::publish`] walks the
//! current observer set and uses `try_send`, so a slow or vanished observer
//! never blocks the publisher or the other observers:
//!
//! - closed receiver → the observer is removed
//! - full buffer → the event is dropped for that observer only
//!
//! There is no replay. An observer sees only events published after it
//! subscribed. Dropping a [`Subscription`] unsubscribes it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::models::SyncEvent;

const DEFAULT_BUFFER: usize = 16;

struct Inner {
    next_id: AtomicU64,
    buffer: usize,
    observers: Mutex<HashMap<u64, mpsc::Sender<SyncEvent>>>,
}

impl Inner {
    fn observers(&self) -> MutexGuard<'_, HashMap<u64, mpsc::Sender<SyncEvent>>> {
        self.observers.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Shared handle to the observer set. Cloning is cheap.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

/// A live observer registration.
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<SyncEvent>,
    owner: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. Returns `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SyncEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.owner.upgrade() {
            inner.observers().remove(&self.id);
            trace!(observer = self.id, "observer dropped");
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    /// Per-observer buffer of undelivered events.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
                observers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        self.inner.observers().insert(id, tx);
        debug!(observer = id, "observer subscribed");
        Subscription {
            id,
            receiver: rx,
            owner: Arc::downgrade(&self.inner),
        }
    }

    /// Remove an observer. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let removed = self.inner.observers().remove(&id).is_some();
        if removed {
            debug!(observer = id, "observer unsubscribed");
        }
        removed
    }

    /// Deliver `event` to every current observer. Returns how many received it.
    pub fn publish(&self, event: &SyncEvent) -> usize {
        let mut observers = self.inner.observers();
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, tx) in observers.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(observer = id, "observer buffer full, event dropped");
                }
            }
        }
        for id in closed {
            observers.remove(&id);
            debug!(observer = id, "removed closed observer");
        }
        delivered
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(content: &str) -> SyncEvent {
        SyncEvent::index_updated(content.to_string())
    }

    fn content(event: SyncEvent) -> String {
        match event {
            SyncEvent::IndexUpdated { content, .. } => content,
        }
    }

    #[tokio::test]
    async fn failed_observer_does_not_block_others() {
        let hub = Broadcaster::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        let mut c = hub.subscribe();

        // Dead connection: b's channel is closed but still registered.
        b.receiver.close();

        assert_eq!(hub.publish(&event("v1")), 2);
        assert_eq!(content(a.recv().await.unwrap()), "v1");
        assert_eq!(content(c.recv().await.unwrap()), "v1");
        assert_eq!(hub.observer_count(), 2);
        drop(b);
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_replay() {
        let hub = Broadcaster::new();
        hub.publish(&event("before"));

        let mut late = hub.subscribe();
        assert!(late.try_recv().is_none());

        hub.publish(&event("after"));
        assert_eq!(content(late.recv().await.unwrap()), "after");
    }

    #[test]
    fn unsubscribe_and_drop_remove_observers() {
        let hub = Broadcaster::new();
        let a = hub.subscribe();
        let b = hub.subscribe();
        assert_eq!(hub.observer_count(), 2);

        assert!(hub.unsubscribe(a.id()));
        assert!(!hub.unsubscribe(a.id()));
        drop(b);
        assert_eq!(hub.observer_count(), 0);
        assert_eq!(hub.publish(&event("nobody")), 0);
    }

    #[test]
    fn full_buffer_drops_only_for_that_observer() {
        let hub = Broadcaster::with_buffer(1);
        let mut slow = hub.subscribe();
        hub.publish(&event("1"));

        let mut fresh = hub.subscribe();
        assert_eq!(hub.publish(&event("2")), 1);
        assert_eq!(content(slow.try_recv().unwrap()), "1");
        assert!(slow.try_recv().is_none());
        assert_eq!(content(fresh.try_recv().unwrap()), "2");
        assert_eq!(hub.observer_count(), 2);
    }
}
