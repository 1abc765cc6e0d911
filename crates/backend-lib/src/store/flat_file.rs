// ============================
// voiceroom-backend-lib/src/store/flat_file.rs
// ============================
//! Journal-backed storage: the memory backend plus an append-only log.
use std::fs;
use std::io::{BufRead, BufReader, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::{fs as tokio_fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{info, warn};

use super::{Change, CommitBatch, DocKey, Document, MemoryStorage, Storage};
use crate::error::AppError;

const JOURNAL_FILE: &str = "journal.log";

/// Every committed batch is one JSON line of [`Change`]s in `journal.log`.
/// Opening replays the journal and rewrites it as a compact snapshot.
#[derive(Clone)]
pub struct FlatFileStorage {
    root: PathBuf,
    memory: MemoryStorage,
    journal: Arc<Mutex<Journal>>,
}

/// Append handle that knows where the last complete line ends
struct Journal {
    file: tokio_fs::File,
    len: u64,
}

impl Journal {
    /// Write one line durably. A partial write is cut back so the next
    /// line never lands after a fragment.
    async fn append(&mut self, line: &[u8]) -> std::io::Result<()> {
        if self.file.metadata().await?.len() != self.len {
            warn!(expected = self.len, "dropping incomplete journal tail");
            self.file.set_len(self.len).await?;
        }
        let written = async {
            self.file.write_all(line).await?;
            self.file.flush().await?;
            self.file.sync_data().await
        }
        .await;
        match written {
            Ok(()) => {
                self.len += line.len() as u64;
                Ok(())
            },
            Err(e) => {
                if let Err(truncate) = self.file.set_len(self.len).await {
                    warn!(error = %truncate, "could not cut back failed journal append");
                }
                Err(e)
            },
        }
    }
}

impl FlatFileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let path = root.join(JOURNAL_FILE);

        let memory = MemoryStorage::new();
        let replayed = replay(&path, &memory)?;
        compact(&path, &memory)?;
        info!(path = %path.display(), batches = replayed, documents = memory.len(), "journal opened");

        let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            root,
            memory,
            journal: Arc::new(Mutex::new(Journal {
                file: tokio_fs::File::from_std(file),
                len,
            })),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Load every complete journal line into `memory`; returns the line count.
/// A torn last line from a crash mid-append is skipped.
fn replay(path: &Path, memory: &MemoryStorage) -> anyhow::Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let reader = BufReader::new(fs::File::open(path)?);
    let mut batches = 0;
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Vec<Change>>(&line) {
            Ok(changes) => {
                memory.install(&changes);
                batches += 1;
            },
            Err(e) => {
                warn!(line = number + 1, error = %e, "skipping unreadable journal line");
            },
        }
    }
    Ok(batches)
}

/// Rewrite the journal as a single snapshot line
fn compact(path: &Path, memory: &MemoryStorage) -> anyhow::Result<()> {
    let snapshot = memory.snapshot();
    let tmp = path.with_extension("log.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        if !snapshot.is_empty() {
            serde_json::to_writer(&mut file, &snapshot)?;
            file.write_all(b"\n")?;
        }
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl Storage for FlatFileStorage {
    async fn get(&self, key: &DocKey) -> Result<Option<Document>, AppError> {
        self.memory.get(key).await
    }

    async fn list(&self, collection: &str, prefix: &str) -> Result<Vec<(String, Document)>, AppError> {
        self.memory.list(collection, prefix).await
    }

    /// Append a JSON line to `journal.log` and sync it, then make it visible.
    async fn commit(&self, batch: CommitBatch) -> Result<Vec<Change>, AppError> {
        // the journal lock serializes commits, so the plan stays valid until installed
        let mut journal = self.journal.lock().await;
        let changes = self.memory.plan(&batch)?;
        if changes.is_empty() {
            return Ok(changes);
        }

        let mut line = serde_json::to_vec(&changes)?;
        line.push(b'\n');
        journal.append(&line).await?;

        self.memory.install(&changes);
        Ok(changes)
    }
}
