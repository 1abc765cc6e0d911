// ============================
// voiceroom-backend-lib/src/store/mod.rs
// ============================
//! Versioned document storage with optimistic transactions and a change feed.
//!
//! Documents are JSON bodies addressed by `(collection, id)`. Every write bumps
//! the document's version; a commit only applies if every version it read is
//! still current. [`Db`] layers typed access, the retrying transaction runner
//! and the broadcast feed of committed changes on top of a [`Storage`] backend.
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::metrics::{TXN_ABORTED, TXN_COMMIT, TXN_CONFLICT};

mod flat_file;
mod memory;
mod records;
mod txn;

pub use flat_file::FlatFileStorage;
pub use memory::MemoryStorage;
pub use records::{collections, Credentials, DisplayIdEntry, Record, UnreadEntry};
pub use txn::{RetryPolicy, TxnView};

/// Address of a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocKey {
    pub collection: String,
    pub id: String,
}

impl DocKey {
    pub fn new(collection: &str, id: &str) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    /// Key of record type `R` with `id`
    pub fn of<R: Record>(id: &str) -> Self {
        Self::new(R::COLLECTION, id)
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Stored body plus its version (always >= 1; 0 means absent)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub version: u64,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Write {
    Put { key: DocKey, body: Value },
    Delete { key: DocKey },
}

impl Write {
    pub fn key(&self) -> &DocKey {
        match self {
            Write::Put { key, .. } | Write::Delete { key } => key,
        }
    }
}

/// Writes applied together, only if every `(key, version)` precondition holds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitBatch {
    pub preconditions: Vec<(DocKey, u64)>,
    pub writes: Vec<Write>,
}

/// One committed document change; `body` is `None` for deletes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub key: DocKey,
    pub version: u64,
    pub body: Option<Value>,
}

/// Trait for storage backends
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read one document
    async fn get(&self, key: &DocKey) -> Result<Option<Document>, AppError>;

    /// Documents of `collection` whose id starts with `prefix`, in id order
    async fn list(&self, collection: &str, prefix: &str) -> Result<Vec<(String, Document)>, AppError>;

    /// Apply `batch` atomically or fail with [`AppError::Conflict`].
    /// A batch without writes only checks its preconditions.
    async fn commit(&self, batch: CommitBatch) -> Result<Vec<Change>, AppError>;
}

/// Typed, transactional access to a [`Storage`] backend
pub struct Db<S> {
    storage: Arc<S>,
    feed: broadcast::Sender<Change>,
    retry: RetryPolicy,
}

impl<S> Clone for Db<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            feed: self.feed.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<S: Storage + 'static> Db<S> {
    pub fn new(storage: S, retry: RetryPolicy, feed_capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(feed_capacity.max(1));
        Self {
            storage: Arc::new(storage),
            feed,
            retry,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Receive every change committed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.feed.subscribe()
    }

    pub async fn get<R: Record>(&self, id: &str) -> Result<Option<R>, AppError> {
        match self.storage.get(&DocKey::of::<R>(id)).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc.body)?)),
            None => Ok(None),
        }
    }

    /// Like [`Db::get`] but a missing document is `R::missing`
    pub async fn require<R: Record>(&self, id: &str) -> Result<R, AppError> {
        self.get(id).await?.ok_or_else(|| R::missing(id))
    }

    /// All records of `R` whose id starts with `prefix`
    pub async fn list<R: Record>(&self, prefix: &str) -> Result<Vec<R>, AppError> {
        self.storage
            .list(R::COLLECTION, prefix)
            .await?
            .into_iter()
            .map(|(_, doc)| serde_json::from_value(doc.body).map_err(AppError::from))
            .collect()
    }

    /// Create a record that must not exist yet
    pub async fn insert<R: Record>(&self, record: &R) -> Result<(), AppError> {
        let key = record.key();
        let batch = CommitBatch {
            preconditions: vec![(key.clone(), 0)],
            writes: vec![Write::Put {
                key,
                body: serde_json::to_value(record)?,
            }],
        };
        self.commit(batch).await.map(|_| ())
    }

    /// Commit a raw batch and publish its changes
    pub async fn commit(&self, batch: CommitBatch) -> Result<Vec<Change>, AppError> {
        let changes = self.storage.commit(batch).await?;
        for change in &changes {
            // no receivers is fine
            let _ = self.feed.send(change.clone());
        }
        Ok(changes)
    }

    /// Run `body` against the current versions of `keys` and commit its writes.
    ///
    /// A version conflict reruns the whole read-compute-commit cycle with
    /// backoff. Errors from `body` abort without retry once the reads it saw
    /// are confirmed current.
    pub async fn transact<T, F>(&self, keys: Vec<DocKey>, mut body: F) -> Result<T, AppError>
    where
        F: FnMut(&mut TxnView) -> Result<T, AppError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut reads = Vec::with_capacity(keys.len());
            for key in &keys {
                reads.push((key.clone(), self.storage.get(key).await?));
            }
            let mut view = TxnView::new(reads);
            let outcome = body(&mut view);
            let batch = match &outcome {
                Ok(_) => view.into_batch(),
                // confirm the failure was not computed from a torn read
                Err(_) => view.into_check(),
            };

            match self.commit(batch).await {
                Ok(_) => {
                    if outcome.is_ok() {
                        counter!(TXN_COMMIT).increment(1);
                    }
                    return outcome;
                },
                Err(AppError::Conflict(key)) => {
                    counter!(TXN_CONFLICT).increment(1);
                    if attempt >= self.retry.max_attempts {
                        counter!(TXN_ABORTED).increment(1);
                        warn!(%key, attempt, "transaction gave up after repeated conflicts");
                        return Err(AppError::Contention { attempts: attempt });
                    }
                    let delay = self.retry.delay(attempt);
                    debug!(%key, attempt, ?delay, "transaction conflict, retrying");
                    tokio::time::sleep(delay).await;
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voiceroom_common::{Banner, Room};

    fn banner(id: &str, position: u32) -> Banner {
        Banner {
            id: id.to_string(),
            image_url: format!("https://cdn.example/{id}.png"),
            link: None,
            position,
            active: true,
            created_at: 0,
        }
    }

    fn db() -> Db<MemoryStorage> {
        Db::new(MemoryStorage::new(), RetryPolicy::immediate(4), 16)
    }

    #[tokio::test]
    async fn test_insert_rejects_existing_document() {
        let db = db();
        db.insert(&banner("b1", 1)).await.unwrap();
        let err = db.insert(&banner("b1", 2)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(db.require::<Banner>("b1").await.unwrap().position, 1);
    }

    #[tokio::test]
    async fn test_missing_record_uses_typed_error() {
        let db = db();
        assert!(matches!(db.require::<Room>("nope").await, Err(AppError::RoomNotFound)));
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let db = db();
        for id in ["a/1", "a/2", "b/1"] {
            db.insert(&banner(id, 0)).await.unwrap();
        }
        let listed: Vec<Banner> = db.list("a/").await.unwrap();
        let ids: Vec<_> = listed.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["a/1", "a/2"]);
    }

    #[tokio::test]
    async fn test_commits_are_published_on_the_feed() {
        let db = db();
        let mut rx = db.subscribe();
        db.insert(&banner("b1", 1)).await.unwrap();
        let change = rx.recv().await.unwrap();
        assert_eq!(change.key, DocKey::of::<Banner>("b1"));
        assert_eq!(change.version, 1);
        assert!(change.body.is_some());
    }

    #[tokio::test]
    async fn test_transaction_rule_error_aborts_without_write() {
        let db = db();
        db.insert(&banner("b1", 1)).await.unwrap();
        let result: Result<(), AppError> = db
            .transact(vec![DocKey::of::<Banner>("b1")], |txn| {
                let mut b: Banner = txn.require("b1")?;
                b.position = 9;
                txn.put(&b)?;
                Err(AppError::InvalidInput("nope".to_string()))
            })
            .await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert_eq!(db.require::<Banner>("b1").await.unwrap().position, 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_all_land() {
        let db = db();
        db.insert(&banner("counter", 0)).await.unwrap();
        let db = Db {
            retry: RetryPolicy::immediate(100),
            ..db
        };

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let db = db.clone();
            tasks.push(tokio::spawn(async move {
                db.transact(vec![DocKey::of::<Banner>("counter")], |txn| {
                    let mut b: Banner = txn.require("counter")?;
                    b.position += 1;
                    txn.put(&b)
                })
                .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(db.require::<Banner>("counter").await.unwrap().position, 20);
    }
}
