// src/store/mod.rs
//! Durable state: the seen-id set and the discovery log.
//!
//! Both files are rewritten whole and swapped in with a rename, so a crash in
//! the middle of a write leaves the previous complete file in place.

pub mod discovery_log;
pub mod seen;

pub use discovery_log::{DiscoveryLog, LogEntry, LogUser};
pub use seen::SeenStore;

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::errors::{EngineError, Result};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` to a sibling temp file, fsync it and rename it over `path`.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| EngineError::persist(dir, e))?;
    }

    let tmp = temp_path(path);
    let mut f = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| EngineError::persist(&tmp, e))?;
    f.write_all(bytes)
        .await
        .map_err(|e| EngineError::persist(&tmp, e))?;
    f.sync_all()
        .await
        .map_err(|e| EngineError::persist(&tmp, e))?;
    drop(f);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| EngineError::persist(path, e))
}

/// Read a state file; `Ok(None)` when it does not exist yet.
pub(crate) async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(EngineError::persist(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_file_is_a_sibling() {
        let p = Path::new("state/seen.json");
        assert_eq!(temp_path(p), PathBuf::from("state/seen.json.tmp"));
    }

    #[tokio::test]
    async fn atomic_write_replaces_content_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("nested").join("state.json");
        write_atomic(&p, b"one").await.unwrap();
        write_atomic(&p, b"two").await.unwrap();
        assert_eq!(std::fs::read(&p).unwrap(), b"two");
        assert!(!temp_path(&p).exists());
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let got = read_optional(&dir.path().join("nope.json")).await.unwrap();
        assert!(got.is_none());
    }
}
