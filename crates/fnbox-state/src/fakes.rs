//! In-memory stores (tests and process-lifetime state)
//!
//! `MemoryMetricsStore` satisfies the `MetricsStore` contract without touching
//! disk. `MemoryPoolStore` is also the production pool registry: pool images
//! only need to be remembered for the life of the process.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryMetricsStore
// ---------------------------------------------------------------------------

/// Metrics log backed by a `Vec<MetricsRecord>`.
#[derive(Debug, Default)]
pub struct MemoryMetricsStore {
    records: Mutex<Vec<MetricsRecord>>,
}

impl MemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records appended so far.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every record, oldest first.
    pub fn snapshot(&self) -> Vec<MetricsRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsStore for MemoryMetricsStore {
    async fn append(&self, record: MetricsRecord) -> StorageResult<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }

    async fn list(&self, filter: &MetricsFilter) -> StorageResult<Vec<MetricsRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records.iter().filter(|r| filter.matches(r)).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryPoolStore
// ---------------------------------------------------------------------------

/// Pool registry backed by an ordered, de-duplicated `Vec<String>`.
#[derive(Debug, Default)]
pub struct MemoryPoolStore {
    tags: Mutex<Vec<String>>,
}

impl MemoryPoolStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PoolStore for MemoryPoolStore {
    async fn register(&self, tag: &str) -> StorageResult<()> {
        let mut tags = self.tags.lock().unwrap();
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
        Ok(())
    }

    async fn tags(&self) -> StorageResult<Vec<String>> {
        Ok(self.tags.lock().unwrap().clone())
    }
}
