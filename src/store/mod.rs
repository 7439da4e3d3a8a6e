//! Document store abstraction
//!
//! Documents are JSON objects addressed by `(collection, id)`. Every write
//! stamps the document with a store-wide, strictly increasing version, which
//! callers use as an optimistic-concurrency token in [`WriteBatch`]
//! preconditions. A batch is atomic: either every operation applies or none
//! does.
//!
//! Backends:
//! - [`MemoryStore`]: in-process, used by tests and the `memory` backend
//! - [`SledStore`]: persistent, documents encoded with rmp-serde

mod memory;
mod sled_store;
mod transaction;
pub mod watch;

pub use memory::MemoryStore;
pub use sled_store::{SledStore, SledStoreConfig};
pub use transaction::with_retries;
pub use watch::{watch_document, watch_query, Subscription};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::broadcast;

use crate::error::{DuelError, Result};

/// Capacity of the change broadcast channel
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// A document as read from the store
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: String,
    pub version: u64,
    pub data: Value,
}

impl Snapshot {
    /// Decode the document into a typed record
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            DuelError::Serialization(format!("document {}: {}", self.id, e))
        })
    }
}

/// Encode a typed record as a document body
pub fn to_document<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Merge top-level fields into an existing document instead of replacing it
    pub merge: bool,
}

impl SetOptions {
    pub fn merge() -> Self {
        Self { merge: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Condition checked against the state before the batch is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    None,
    Exists,
    Missing,
    /// Document exists and still carries this version
    Version(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set { data: Value, options: SetOptions },
    /// Replace top-level fields; the document must exist
    Update { fields: Map<String, Value> },
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub collection: String,
    pub id: String,
    pub op: WriteOp,
    pub precondition: Precondition,
}

/// Ordered group of writes committed atomically
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        mut self,
        collection: &str,
        id: &str,
        data: Value,
        precondition: Precondition,
    ) -> Self {
        self.writes.push(Write {
            collection: collection.to_string(),
            id: id.to_string(),
            op: WriteOp::Set {
                data,
                options: SetOptions::default(),
            },
            precondition,
        });
        self
    }

    pub fn update(
        mut self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
        precondition: Precondition,
    ) -> Self {
        self.writes.push(Write {
            collection: collection.to_string(),
            id: id.to_string(),
            op: WriteOp::Update { fields },
            precondition,
        });
        self
    }

    pub fn delete(mut self, collection: &str, id: &str, precondition: Precondition) -> Self {
        self.writes.push(Write {
            collection: collection.to_string(),
            id: id.to_string(),
            op: WriteOp::Delete,
            precondition,
        });
        self
    }

    pub fn push(mut self, write: Write) -> Self {
        self.writes.push(write);
        self
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Change notifications emitted once the batch is applied
    pub(crate) fn change_events(&self) -> Vec<ChangeEvent> {
        self.writes
            .iter()
            .map(|w| ChangeEvent {
                collection: w.collection.clone(),
                id: w.id.clone(),
                kind: match w.op {
                    WriteOp::Delete => ChangeKind::Deleted,
                    _ => ChangeKind::Written,
                },
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Written,
    Deleted,
}

/// Notification that a document changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub collection: String,
    pub id: String,
    pub kind: ChangeKind,
}

/// Read shapes supported by [`watch_query`]
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    All,
    Ordered {
        field: String,
        direction: Direction,
        limit: usize,
    },
    Eq {
        field: String,
        value: Value,
    },
}

impl Query {
    pub async fn run(&self, store: &dyn DocumentStore, collection: &str) -> Result<Vec<Snapshot>> {
        match self {
            Query::All => store.list(collection).await,
            Query::Ordered {
                field,
                direction,
                limit,
            } => store.query_ordered(collection, field, *direction, *limit).await,
            Query::Eq { field, value } => store.query_eq(collection, field, value).await,
        }
    }
}

/// Persistence capability used by every service
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Snapshot>>;

    /// Every document of a collection, ordered by id
    async fn list(&self, collection: &str) -> Result<Vec<Snapshot>>;

    async fn delete_document(&self, collection: &str, id: &str) -> Result<bool>;

    /// Apply every write or none; a failed precondition yields `Conflict`
    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    fn changes(&self) -> broadcast::Receiver<ChangeEvent>;

    /// Persist buffered writes; a no-op for volatile backends
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        data: Value,
        options: SetOptions,
    ) -> Result<()> {
        let write = Write {
            collection: collection.to_string(),
            id: id.to_string(),
            op: WriteOp::Set { data, options },
            precondition: Precondition::None,
        };
        self.commit(WriteBatch::new().push(write)).await
    }

    /// Fails with `NotFound` when the document does not exist
    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<()> {
        self.commit(WriteBatch::new().update(collection, id, fields, Precondition::None))
            .await
    }

    /// Documents carrying `field`, sorted on it; documents without it are skipped
    async fn query_ordered(
        &self,
        collection: &str,
        field: &str,
        direction: Direction,
        limit: usize,
    ) -> Result<Vec<Snapshot>> {
        let docs = self.list(collection).await?;
        Ok(order_by(docs, field, direction, limit))
    }

    async fn query_eq(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<Snapshot>> {
        let docs = self.list(collection).await?;
        Ok(docs
            .into_iter()
            .filter(|doc| doc.data.get(field) == Some(value))
            .collect())
    }
}

pub(crate) fn order_by(
    mut docs: Vec<Snapshot>,
    field: &str,
    direction: Direction,
    limit: usize,
) -> Vec<Snapshot> {
    docs.retain(|doc| doc.data.get(field).is_some_and(|v| !v.is_null()));
    docs.sort_by(|a, b| {
        let ord = compare_values(&a.data[field], &b.data[field]);
        match direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        }
    });
    docs.truncate(limit);
    docs
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Check a precondition against the pre-batch version of a document
pub(crate) fn check_precondition(
    write: &Write,
    current_version: Option<u64>,
) -> Result<()> {
    let ok = match (write.precondition, current_version) {
        (Precondition::None, _) => true,
        (Precondition::Exists, found) => found.is_some(),
        (Precondition::Missing, found) => found.is_none(),
        (Precondition::Version(expected), Some(found)) => expected == found,
        (Precondition::Version(_), None) => false,
    };
    if ok {
        Ok(())
    } else {
        Err(DuelError::Conflict(format!(
            "{}/{}: expected {:?}, found version {:?}",
            write.collection, write.id, write.precondition, current_version
        )))
    }
}

/// New body of a document after `op`; `None` means deleted
pub(crate) fn apply_op(write: &Write, current: Option<&Value>) -> Result<Option<Value>> {
    match &write.op {
        WriteOp::Set { data, options } => {
            if !data.is_object() {
                return Err(DuelError::Validation(format!(
                    "{}/{}: document body must be an object",
                    write.collection, write.id
                )));
            }
            match (options.merge, current) {
                (true, Some(Value::Object(existing))) => {
                    let mut merged = existing.clone();
                    if let Value::Object(fields) = data {
                        for (k, v) in fields {
                            merged.insert(k.clone(), v.clone());
                        }
                    }
                    Ok(Some(Value::Object(merged)))
                }
                _ => Ok(Some(data.clone())),
            }
        }
        WriteOp::Update { fields } => match current {
            Some(Value::Object(existing)) => {
                let mut updated = existing.clone();
                for (k, v) in fields {
                    updated.insert(k.clone(), v.clone());
                }
                Ok(Some(Value::Object(updated)))
            }
            _ => Err(DuelError::NotFound(format!("{}/{}", write.collection, write.id))),
        },
        WriteOp::Delete => Ok(None),
    }
}

/// Pending state of the documents touched by a batch, so later writes in the
/// same batch observe earlier ones
#[derive(Default)]
pub(crate) struct Staging {
    docs: HashMap<(String, String), Option<Value>>,
}

impl Staging {
    pub(crate) fn get(&self, write: &Write) -> Option<&Option<Value>> {
        self.docs.get(&(write.collection.clone(), write.id.clone()))
    }

    pub(crate) fn put(&mut self, write: &Write, value: Option<Value>) {
        self.docs
            .insert((write.collection.clone(), write.id.clone()), value);
    }

    pub(crate) fn into_entries(self) -> impl Iterator<Item = ((String, String), Option<Value>)> {
        self.docs.into_iter()
    }
}
