//! File-backed metrics log stored as a single JSON array.
//!
//! Every append reloads the array, pushes the record and replaces the file
//! atomically (temp file in the same directory, then rename). Appends on one
//! store are serialized by an async lock so concurrent invocations never
//! overwrite each other's records.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::storage_traits::{MetricsFilter, MetricsRecord, MetricsStore, StorageResult};

/// Metrics log persisted as a pretty-printed JSON array at `path`.
#[derive(Debug, Clone)]
pub struct JsonFileMetricsStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonFileMetricsStore {
    /// Create a store for `path`. The file is created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Load the whole array. A missing or empty file is an empty log.
fn load_records(path: &Path) -> StorageResult<Vec<MetricsRecord>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content).map_err(|e| StorageError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn append_blocking(path: &Path, record: MetricsRecord) -> StorageResult<()> {
    let mut records = load_records(path)?;
    records.push(record);

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

    let body = serde_json::to_vec_pretty(&records)?;
    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| StorageError::io(&dir, e))?;
    tmp.write_all(&body).map_err(|e| StorageError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StorageError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| StorageError::io(path, e.error))?;
    Ok(())
}

#[async_trait]
impl MetricsStore for JsonFileMetricsStore {
    async fn append(&self, record: MetricsRecord) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append_blocking(&path, record))
            .await
            .map_err(|e| StorageError::WriterTask(e.to_string()))?
    }

    async fn list(&self, filter: &MetricsFilter) -> StorageResult<Vec<MetricsRecord>> {
        let path = self.path.clone();
        let records = tokio::task::spawn_blocking(move || load_records(&path))
            .await
            .map_err(|e| StorageError::WriterTask(e.to_string()))??;
        Ok(records.into_iter().filter(|r| filter.matches(r)).collect())
    }
}
