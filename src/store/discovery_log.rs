// src/store/discovery_log.rs
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::{read_optional, write_atomic};
use crate::errors::{EngineError, Result};
use crate::model::{Item, ItemId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogUser {
    pub name: String,
    pub handle: String,
}

/// One discovered item as stored in the log file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub id: ItemId,
    pub title: String,
    #[serde(default)]
    pub caption: String,
    pub user: LogUser,
    #[serde(default)]
    pub tags: String,
    pub create_timestamp: DateTime<FixedOffset>,
    #[serde(default)]
    pub is_sensitive: bool,
}

impl From<&Item> for LogEntry {
    fn from(it: &Item) -> Self {
        Self {
            id: it.id,
            title: it.title.clone(),
            caption: it.caption.clone(),
            user: LogUser {
                name: it.owner.name.clone(),
                handle: it.owner.handle.clone(),
            },
            tags: it.tag_string(),
            create_timestamp: it.create_timestamp,
            is_sensitive: it.sensitive(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LogFile {
    items: Vec<LogEntry>,
}

/// Append-only history of discoveries, kept newest-first on disk.
#[derive(Debug)]
pub struct DiscoveryLog {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl DiscoveryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert `item` and rewrite the file sorted by creation time, newest first.
    /// Items created at the same instant keep the order they were appended in.
    pub async fn append(&self, item: &Item) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.read_file().await?;
        file.items.push(LogEntry::from(item));
        sort_newest_first(&mut file.items);

        let bytes = serde_json::to_vec_pretty(&file).map_err(|source| EngineError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, &bytes).await
    }

    pub async fn entries(&self) -> Result<Vec<LogEntry>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_file().await?.items)
    }

    async fn read_file(&self) -> Result<LogFile> {
        match read_optional(&self.path).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|source| EngineError::Corrupt {
                path: self.path.clone(),
                source,
            }),
            None => Ok(LogFile::default()),
        }
    }
}

fn sort_newest_first(items: &mut [LogEntry]) {
    // stable: ties keep insertion order
    items.sort_by(|a, b| b.create_timestamp.cmp(&a.create_timestamp));
}
