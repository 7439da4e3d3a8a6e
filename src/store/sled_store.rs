//! Persistent document store backed by sled
//!
//! Documents live in a single tree under composite keys `{collection}:{id}`.
//! Each value is an rmp-serde envelope carrying the version, the last write
//! time and the JSON body.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use super::{
    apply_op, check_precondition, ChangeEvent, ChangeKind, DocumentStore, Snapshot, Staging,
    WriteBatch, CHANGE_CHANNEL_CAPACITY,
};
use crate::error::{DuelError, Result};

/// Configuration for the sled store
#[derive(Debug, Clone)]
pub struct SledStoreConfig {
    pub db_path: PathBuf,
    /// Cache size in bytes
    pub cache_size: u64,
}

impl Default for SledStoreConfig {
    fn default() -> Self {
        Self {
            db_path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("led-duel")
                .join("documents.sled"),
            cache_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDocument {
    version: u64,
    /// Unix millis
    last_modified: i64,
    /// JSON-encoded body
    data: Vec<u8>,
}

impl StoredDocument {
    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    fn body(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    fn snapshot(&self, id: &str) -> Result<Snapshot> {
        Ok(Snapshot {
            id: id.to_string(),
            version: self.version,
            data: self.body()?,
        })
    }
}

fn storage_key(collection: &str, id: &str) -> String {
    format!("{}:{}", collection, id)
}

pub struct SledStore {
    db: sled::Db,
    docs: sled::Tree,
    changes: broadcast::Sender<ChangeEvent>,
}

impl SledStore {
    pub async fn new(config: SledStoreConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = sled::Config::new()
            .path(&config.db_path)
            .cache_capacity(config.cache_size)
            .open()?;
        let docs = db.open_tree("documents")?;

        info!(path = %config.db_path.display(), "SledStore initialized");

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self { db, docs, changes })
    }

    pub async fn at_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(SledStoreConfig {
            db_path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
        .await
    }

    fn emit(&self, events: Vec<ChangeEvent>) {
        for event in events {
            trace!(collection = %event.collection, id = %event.id, "Emitting change");
            let _ = self.changes.send(event);
        }
    }
}

fn abort(err: DuelError) -> ConflictableTransactionError<DuelError> {
    ConflictableTransactionError::Abort(err)
}

#[async_trait]
impl DocumentStore for SledStore {
    async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Snapshot>> {
        match self.docs.get(storage_key(collection, id).as_bytes())? {
            Some(bytes) => Ok(Some(StoredDocument::decode(&bytes)?.snapshot(id)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, collection: &str) -> Result<Vec<Snapshot>> {
        let prefix = format!("{}:", collection);
        let mut docs = Vec::new();
        for item in self.docs.scan_prefix(prefix.as_bytes()) {
            let (key, bytes) = item?;
            let key = String::from_utf8_lossy(&key);
            let id = &key[prefix.len()..];
            docs.push(StoredDocument::decode(&bytes)?.snapshot(id)?);
        }
        Ok(docs)
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<bool> {
        let existed = self
            .docs
            .remove(storage_key(collection, id).as_bytes())?
            .is_some();
        if existed {
            debug!(collection = %collection, id = %id, "Document deleted");
            self.emit(vec![ChangeEvent {
                collection: collection.to_string(),
                id: id.to_string(),
                kind: ChangeKind::Deleted,
            }]);
        }
        Ok(existed)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        // Ids are monotonic across restarts, so versions never repeat
        let version = self.db.generate_id()?;
        let last_modified = chrono::Utc::now().timestamp_millis();

        let outcome = self.docs.transaction(|tx| {
            let mut current = Vec::with_capacity(batch.len());
            for write in batch.writes() {
                let stored = match tx.get(storage_key(&write.collection, &write.id).as_bytes())? {
                    Some(bytes) => Some(StoredDocument::decode(&bytes).map_err(abort)?),
                    None => None,
                };
                check_precondition(write, stored.as_ref().map(|s| s.version)).map_err(abort)?;
                current.push(stored);
            }

            let mut staging = Staging::default();
            for (write, stored) in batch.writes().iter().zip(&current) {
                let base = match staging.get(write) {
                    Some(staged) => staged.clone(),
                    None => match stored {
                        Some(doc) => Some(doc.body().map_err(abort)?),
                        None => None,
                    },
                };
                let next = apply_op(write, base.as_ref()).map_err(abort)?;
                staging.put(write, next);
            }

            for ((collection, id), value) in staging.into_entries() {
                let key = storage_key(&collection, &id);
                match value {
                    Some(data) => {
                        let envelope = StoredDocument {
                            version,
                            last_modified,
                            data: serde_json::to_vec(&data)
                                .map_err(|e| abort(e.into()))?,
                        };
                        let bytes = rmp_serde::to_vec(&envelope).map_err(|e| abort(e.into()))?;
                        tx.insert(key.as_bytes(), bytes)?;
                    }
                    None => {
                        tx.remove(key.as_bytes())?;
                    }
                }
            }
            Ok::<(), ConflictableTransactionError<DuelError>>(())
        });

        match outcome {
            Ok(()) => {}
            Err(TransactionError::Abort(err)) => return Err(err),
            Err(TransactionError::Storage(err)) => return Err(err.into()),
        }

        debug!(writes = batch.len(), version, "Batch committed");
        self.emit(batch.change_events());
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}
