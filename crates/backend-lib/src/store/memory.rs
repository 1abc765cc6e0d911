//! In-process storage backend.
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Change, CommitBatch, DocKey, Document, Storage, Write};
use crate::error::AppError;

type DocMap = BTreeMap<DocKey, Document>;

/// Documents held in an ordered map behind a single lock
#[derive(Clone, Default)]
pub struct MemoryStorage {
    docs: Arc<RwLock<DocMap>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `batch` against the current state and compute its changes
    /// without applying them
    pub(crate) fn plan(&self, batch: &CommitBatch) -> Result<Vec<Change>, AppError> {
        plan(&self.docs.read(), batch)
    }

    /// Apply changes produced by [`MemoryStorage::plan`] or read back from a journal
    pub(crate) fn install(&self, changes: &[Change]) {
        install(&mut self.docs.write(), changes);
    }

    /// Every stored document as a change, for snapshotting
    pub(crate) fn snapshot(&self) -> Vec<Change> {
        self.docs
            .read()
            .iter()
            .map(|(key, doc)| Change {
                key: key.clone(),
                version: doc.version,
                body: Some(doc.body.clone()),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }
}

fn current_version(docs: &DocMap, key: &DocKey) -> u64 {
    docs.get(key).map_or(0, |doc| doc.version)
}

fn plan(docs: &DocMap, batch: &CommitBatch) -> Result<Vec<Change>, AppError> {
    for (key, expected) in &batch.preconditions {
        if current_version(docs, key) != *expected {
            return Err(AppError::Conflict(key.to_string()));
        }
    }
    Ok(batch
        .writes
        .iter()
        .map(|write| {
            let key = write.key().clone();
            let version = current_version(docs, &key) + 1;
            let body = match write {
                Write::Put { body, .. } => Some(body.clone()),
                Write::Delete { .. } => None,
            };
            Change { key, version, body }
        })
        .collect())
}

fn install(docs: &mut DocMap, changes: &[Change]) {
    for change in changes {
        match &change.body {
            Some(body) => {
                docs.insert(
                    change.key.clone(),
                    Document {
                        version: change.version,
                        body: body.clone(),
                    },
                );
            },
            None => {
                docs.remove(&change.key);
            },
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &DocKey) -> Result<Option<Document>, AppError> {
        Ok(self.docs.read().get(key).cloned())
    }

    async fn list(&self, collection: &str, prefix: &str) -> Result<Vec<(String, Document)>, AppError> {
        let start = DocKey::new(collection, prefix);
        let docs = self.docs.read();
        Ok(docs
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(|(key, _)| key.collection == collection && key.id.starts_with(prefix))
            .map(|(key, doc)| (key.id.clone(), doc.clone()))
            .collect())
    }

    async fn commit(&self, batch: CommitBatch) -> Result<Vec<Change>, AppError> {
        let mut docs = self.docs.write();
        let changes = plan(&docs, &batch)?;
        install(&mut docs, &changes);
        Ok(changes)
    }
}
