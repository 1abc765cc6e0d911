//! Transaction view and retry policy.
use std::collections::BTreeMap;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;

use super::{CommitBatch, DocKey, Document, Record, Write};
use crate::error::AppError;

/// Backoff between conflicting transaction attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up with [`AppError::Contention`]
    pub max_attempts: u32,
    /// Base delay, doubled per attempt
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Add up to 50% random jitter
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay_ms: 5,
            max_delay_ms: 200,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Retry without sleeping; for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let capped = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        let millis = if self.jitter && capped > 0 {
            capped + rand::rng().random_range(0..=capped / 2)
        } else {
            capped
        };
        Duration::from_millis(millis)
    }
}

#[derive(Debug)]
struct ReadSlot {
    version: u64,
    body: Option<Value>,
}

/// Snapshot of the declared documents handed to a transaction body.
///
/// Reads see the body's own pending writes. Only declared keys are readable
/// or writable, so every write is covered by a version precondition.
#[derive(Debug)]
pub struct TxnView {
    reads: BTreeMap<DocKey, ReadSlot>,
    writes: BTreeMap<DocKey, Option<Value>>,
}

impl TxnView {
    pub(crate) fn new(reads: Vec<(DocKey, Option<Document>)>) -> Self {
        let reads = reads
            .into_iter()
            .map(|(key, doc)| {
                let slot = match doc {
                    Some(doc) => ReadSlot {
                        version: doc.version,
                        body: Some(doc.body),
                    },
                    None => ReadSlot { version: 0, body: None },
                };
                (key, slot)
            })
            .collect();
        Self {
            reads,
            writes: BTreeMap::new(),
        }
    }

    fn declared(&self, key: &DocKey) -> Result<(), AppError> {
        if self.reads.contains_key(key) {
            Ok(())
        } else {
            Err(AppError::Internal(format!("{key} was not declared in the transaction")))
        }
    }

    pub fn get<R: Record>(&self, id: &str) -> Result<Option<R>, AppError> {
        let key = DocKey::of::<R>(id);
        self.declared(&key)?;
        let body = match self.writes.get(&key) {
            Some(pending) => pending.as_ref(),
            None => self.reads.get(&key).and_then(|slot| slot.body.as_ref()),
        };
        match body {
            Some(value) => Ok(Some(R::deserialize(value)?)),
            None => Ok(None),
        }
    }

    pub fn require<R: Record>(&self, id: &str) -> Result<R, AppError> {
        self.get(id)?.ok_or_else(|| R::missing(id))
    }

    pub fn exists<R: Record>(&self, id: &str) -> Result<bool, AppError> {
        let key = DocKey::of::<R>(id);
        self.declared(&key)?;
        Ok(match self.writes.get(&key) {
            Some(pending) => pending.is_some(),
            None => self.reads.get(&key).is_some_and(|slot| slot.body.is_some()),
        })
    }

    pub fn put<R: Record>(&mut self, record: &R) -> Result<(), AppError> {
        let key = record.key();
        self.declared(&key)?;
        self.writes.insert(key, Some(serde_json::to_value(record)?));
        Ok(())
    }

    pub fn delete<R: Record>(&mut self, id: &str) -> Result<(), AppError> {
        let key = DocKey::of::<R>(id);
        self.declared(&key)?;
        self.writes.insert(key, None);
        Ok(())
    }

    fn preconditions(&self) -> Vec<(DocKey, u64)> {
        self.reads.iter().map(|(key, slot)| (key.clone(), slot.version)).collect()
    }

    /// Batch committing the pending writes
    pub(crate) fn into_batch(self) -> CommitBatch {
        let preconditions = self.preconditions();
        let writes = self
            .writes
            .into_iter()
            .map(|(key, body)| match body {
                Some(body) => Write::Put { key, body },
                None => Write::Delete { key },
            })
            .collect();
        CommitBatch { preconditions, writes }
    }

    /// Batch that only re-checks the reads
    pub(crate) fn into_check(self) -> CommitBatch {
        CommitBatch {
            preconditions: self.preconditions(),
            writes: Vec::new(),
        }
    }
}
