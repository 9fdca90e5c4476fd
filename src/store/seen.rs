// src/store/seen.rs
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::{read_optional, write_atomic};
use crate::errors::{EngineError, Result};
use crate::model::ItemId;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SeenFile {
    items: Vec<ItemId>,
}

/// Set of item ids that have already been delivered.
///
/// `add` only touches memory; `flush` writes the whole set atomically and is
/// skipped when nothing was added since the last successful flush.
#[derive(Debug)]
pub struct SeenStore {
    path: PathBuf,
    ids: RwLock<HashSet<ItemId>>,
    dirty: AtomicBool,
    flush_lock: tokio::sync::Mutex<()>,
}

impl SeenStore {
    /// Load the last flushed set, or start empty when the file does not exist.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let ids = match read_optional(&path).await? {
            Some(bytes) => {
                let file: SeenFile =
                    serde_json::from_slice(&bytes).map_err(|source| EngineError::Corrupt {
                        path: path.clone(),
                        source,
                    })?;
                file.items.into_iter().collect()
            }
            None => HashSet::new(),
        };
        tracing::debug!(path = %path.display(), count = ids.len(), "seen store loaded");
        Ok(Self::with_ids(path, ids))
    }

    /// Fresh store that ignores whatever is on disk (used when rebuilding).
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self::with_ids(path.into(), HashSet::new())
    }

    fn with_ids(path: PathBuf, ids: HashSet<ItemId>) -> Self {
        Self {
            path,
            ids: RwLock::new(ids),
            dirty: AtomicBool::new(false),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.ids
            .read()
            .expect("seen store lock poisoned")
            .contains(&id)
    }

    /// Record `id`. Returns `true` when it was not seen before.
    pub fn add(&self, id: ItemId) -> bool {
        let inserted = self
            .ids
            .write()
            .expect("seen store lock poisoned")
            .insert(id);
        if inserted {
            self.dirty.store(true, Ordering::Release);
        }
        inserted
    }

    pub fn len(&self) -> usize {
        self.ids.read().expect("seen store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Sorted copy of the current set.
    pub fn snapshot(&self) -> Vec<ItemId> {
        let mut v: Vec<ItemId> = self
            .ids
            .read()
            .expect("seen store lock poisoned")
            .iter()
            .copied()
            .collect();
        v.sort_unstable();
        v
    }

    /// Persist the set if anything changed. A failed write leaves the store dirty.
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.flush_lock.lock().await;
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let file = SeenFile {
            items: self.snapshot(),
        };
        let written = match serde_json::to_vec(&file) {
            Ok(bytes) => write_atomic(&self.path, &bytes).await,
            Err(source) => Err(EngineError::Corrupt {
                path: self.path.clone(),
                source,
            }),
        };
        if let Err(e) = written {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        tracing::trace!(path = %self.path.display(), count = file.items.len(), "seen store flushed");
        Ok(())
    }
}
