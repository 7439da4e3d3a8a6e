//! In-process document store

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};

use super::{
    apply_op, check_precondition, ChangeEvent, ChangeKind, DocumentStore, Snapshot, Staging,
    WriteBatch, CHANGE_CHANNEL_CAPACITY,
};
use crate::error::{DuelError, Result};

#[derive(Debug, Clone)]
struct StoredDocument {
    version: u64,
    data: Value,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, StoredDocument>>,
    last_version: u64,
}

impl Inner {
    fn version_of(&self, collection: &str, id: &str) -> Option<u64> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|doc| doc.version)
    }

    fn data_of(&self, collection: &str, id: &str) -> Option<&Value> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|doc| &doc.data)
    }
}

/// Document store held entirely in memory.
///
/// [`MemoryStore::set_available`] simulates losing the backing service: every
/// read and write then fails with `Unavailable`.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    available: AtomicBool,
    changes: broadcast::Sender<ChangeEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            available: AtomicBool::new(true),
            changes,
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        debug!(available, "MemoryStore availability changed");
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DuelError::Unavailable("memory store is offline".to_string()))
        }
    }

    fn emit(&self, events: Vec<ChangeEvent>) {
        for event in events {
            trace!(collection = %event.collection, id = %event.id, "Emitting change");
            // No subscribers is fine
            let _ = self.changes.send(event);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Snapshot>> {
        self.ensure_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|doc| Snapshot {
                id: id.to_string(),
                version: doc.version,
                data: doc.data.clone(),
            }))
    }

    async fn list(&self, collection: &str) -> Result<Vec<Snapshot>> {
        self.ensure_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, doc)| Snapshot {
                        id: id.clone(),
                        version: doc.version,
                        data: doc.data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<bool> {
        self.ensure_available()?;
        let existed = {
            let mut inner = self.inner.write().await;
            inner
                .collections
                .get_mut(collection)
                .and_then(|docs| docs.remove(id))
                .is_some()
        };
        if existed {
            self.emit(vec![ChangeEvent {
                collection: collection.to_string(),
                id: id.to_string(),
                kind: ChangeKind::Deleted,
            }]);
        }
        Ok(existed)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.ensure_available()?;
        if batch.is_empty() {
            return Ok(());
        }

        {
            let mut inner = self.inner.write().await;

            for write in batch.writes() {
                check_precondition(write, inner.version_of(&write.collection, &write.id))?;
            }

            let mut staging = Staging::default();
            for write in batch.writes() {
                let next = {
                    let current = match staging.get(write) {
                        Some(staged) => staged.as_ref(),
                        None => inner.data_of(&write.collection, &write.id),
                    };
                    apply_op(write, current)?
                };
                staging.put(write, next);
            }

            inner.last_version += 1;
            let version = inner.last_version;
            for ((collection, id), value) in staging.into_entries() {
                let docs = inner.collections.entry(collection).or_default();
                match value {
                    Some(data) => {
                        docs.insert(id, StoredDocument { version, data });
                    }
                    None => {
                        docs.remove(&id);
                    }
                }
            }
            debug!(writes = batch.len(), version, "Batch committed");
        }

        self.emit(batch.change_events());
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}
