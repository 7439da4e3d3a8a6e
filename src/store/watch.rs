//! Push subscriptions over the store's change feed
//!
//! A watcher delivers the current state once, then a full re-read after
//! every change that concerns it. Delivery is best effort: a lagging watcher
//! skips the missed events and re-reads, so consumers always derive their
//! views from whole snapshots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{DocumentStore, Query, Snapshot};

/// Handle to a running watcher; dropping it unsubscribes
pub struct Subscription {
    active: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    fn spawn<F>(task: F, active: Arc<AtomicBool>) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self {
            active,
            handle: Some(tokio::spawn(task)),
        }
    }

    /// Stop further callbacks. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Watch a single document; the callback receives `None` while it is absent
pub fn watch_document<F>(
    store: Arc<dyn DocumentStore>,
    collection: impl Into<String>,
    id: impl Into<String>,
    mut callback: F,
) -> Subscription
where
    F: FnMut(Option<Snapshot>) + Send + 'static,
{
    let collection = collection.into();
    let id = id.into();
    let active = Arc::new(AtomicBool::new(true));
    let flag = active.clone();

    // Subscribe before the first read so no change slips in between
    let mut changes = store.changes();

    let task = async move {
        let mut deliver = |snapshot: Option<Snapshot>| {
            if flag.load(Ordering::SeqCst) {
                callback(snapshot);
            }
        };

        match store.get_document(&collection, &id).await {
            Ok(snapshot) => deliver(snapshot),
            Err(e) => warn!(collection = %collection, id = %id, error = %e, "Initial read failed"),
        }

        loop {
            match changes.recv().await {
                Ok(event) if event.collection == collection && event.id == id => {}
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(collection = %collection, id = %id, skipped, "Watcher lagged, re-reading");
                }
                Err(RecvError::Closed) => break,
            }
            if !flag.load(Ordering::SeqCst) {
                break;
            }
            match store.get_document(&collection, &id).await {
                Ok(snapshot) => deliver(snapshot),
                Err(e) => warn!(collection = %collection, id = %id, error = %e, "Re-read failed"),
            }
        }
    };

    Subscription::spawn(task, active)
}

/// Watch the result of a query over one collection
pub fn watch_query<F>(
    store: Arc<dyn DocumentStore>,
    collection: impl Into<String>,
    query: Query,
    mut callback: F,
) -> Subscription
where
    F: FnMut(Vec<Snapshot>) + Send + 'static,
{
    let collection = collection.into();
    let active = Arc::new(AtomicBool::new(true));
    let flag = active.clone();
    let mut changes = store.changes();

    let task = async move {
        let mut deliver = |docs: Vec<Snapshot>| {
            if flag.load(Ordering::SeqCst) {
                callback(docs);
            }
        };

        match query.run(store.as_ref(), &collection).await {
            Ok(docs) => deliver(docs),
            Err(e) => warn!(collection = %collection, error = %e, "Initial query failed"),
        }

        loop {
            match changes.recv().await {
                Ok(event) if event.collection == collection => {}
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(collection = %collection, skipped, "Watcher lagged, re-querying");
                }
                Err(RecvError::Closed) => break,
            }
            if !flag.load(Ordering::SeqCst) {
                break;
            }
            match query.run(store.as_ref(), &collection).await {
                Ok(docs) => deliver(docs),
                Err(e) => warn!(collection = %collection, error = %e, "Re-query failed"),
            }
        }
    };

    Subscription::spawn(task, active)
}
