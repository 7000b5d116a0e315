//! Metrics recorder: a single writer task in front of a [`MetricsStore`].
//!
//! Every finished invocation sends its record over a channel and waits for
//! the writer's acknowledgement. Queries go through the same queue, so they
//! observe every record acknowledged before them.

use std::sync::Arc;
use std::time::Duration;

use fnbox_state::{MetricsFilter, MetricsRecord, MetricsStore, StorageResult};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{FnboxError, Result};
use crate::invocation::Backend;

const QUEUE_DEPTH: usize = 256;

enum WriterCommand {
    Append {
        record: MetricsRecord,
        ack: oneshot::Sender<StorageResult<()>>,
    },
    Query {
        filter: MetricsFilter,
        reply: oneshot::Sender<StorageResult<Vec<MetricsRecord>>>,
    },
}

/// Handle to the writer task. Cheap to clone; the task exits once every
/// handle is dropped.
#[derive(Clone)]
pub struct MetricsRecorder {
    tx: mpsc::Sender<WriterCommand>,
}

impl MetricsRecorder {
    /// Start the writer task on the current runtime.
    pub fn spawn(store: Arc<dyn MetricsStore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let handle = tokio::spawn(writer_loop(store, rx));
        (Self { tx }, handle)
    }

    /// Persist one record and return it once the store has it.
    pub async fn record(
        &self,
        backend: Backend,
        duration: Duration,
        success: bool,
    ) -> Result<MetricsRecord> {
        let record = MetricsRecord::now(backend.as_str(), duration.as_secs_f64(), success);
        let (ack, done) = oneshot::channel();
        self.tx
            .send(WriterCommand::Append {
                record: record.clone(),
                ack,
            })
            .await
            .map_err(|_| FnboxError::RecorderClosed)?;
        done.await.map_err(|_| FnboxError::RecorderClosed)??;
        Ok(record)
    }

    /// Records matching `filter`, oldest first.
    pub async fn query(&self, filter: MetricsFilter) -> Result<Vec<MetricsRecord>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Query { filter, reply })
            .await
            .map_err(|_| FnboxError::RecorderClosed)?;
        Ok(rx.await.map_err(|_| FnboxError::RecorderClosed)??)
    }
}

async fn writer_loop(store: Arc<dyn MetricsStore>, mut rx: mpsc::Receiver<WriterCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Append { record, ack } => {
                let result = store.append(record).await;
                if let Err(e) = &result {
                    error!(error = %e, "failed to persist metrics record");
                }
                // The caller may have gone away; the record is stored either way.
                let _ = ack.send(result);
            }
            WriterCommand::Query { filter, reply } => {
                let _ = reply.send(store.list(&filter).await);
            }
        }
    }
    debug!("metrics writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use fnbox_state::{JsonFileMetricsStore, MemoryMetricsStore};

    #[tokio::test]
    async fn test_record_is_acknowledged_and_queryable() {
        let store = Arc::new(MemoryMetricsStore::new());
        let (recorder, _writer) = MetricsRecorder::spawn(store.clone());

        let rec = recorder
            .record(Backend::Sandboxed, Duration::from_millis(1234), true)
            .await
            .unwrap();
        assert_eq!(rec.backend, "sandboxed");
        assert_eq!(rec.duration, 1.234);
        assert_eq!(store.len(), 1);

        let all = recorder.query(MetricsFilter::default()).await.unwrap();
        assert_eq!(all, vec![rec]);
    }

    #[tokio::test]
    async fn test_concurrent_records_are_all_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileMetricsStore::new(dir.path().join("metrics.json")));
        let (recorder, _writer) = MetricsRecorder::spawn(store);

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let recorder = recorder.clone();
                tokio::spawn(async move {
                    recorder
                        .record(Backend::Standard, Duration::from_millis(i), i % 2 == 0)
                        .await
                        .unwrap()
                })
            })
            .collect();
        for t in futures::future::join_all(tasks).await {
            t.unwrap();
        }

        let failures = recorder
            .query(MetricsFilter {
                success: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failures.len(), 10);
        assert_eq!(recorder.query(MetricsFilter::default()).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_store_error_reaches_caller() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        std::fs::write(&path, "{ not an array").unwrap();
        let (recorder, _writer) =
            MetricsRecorder::spawn(Arc::new(JsonFileMetricsStore::new(&path)));

        let err = recorder
            .record(Backend::Standard, Duration::from_secs(1), true)
            .await
            .unwrap_err();
        assert!(matches!(err, FnboxError::Metrics(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not an array");
    }

    #[tokio::test]
    async fn test_stopped_writer_is_recorder_closed() {
        let (recorder, writer) = MetricsRecorder::spawn(Arc::new(MemoryMetricsStore::new()));
        writer.abort();
        let _ = writer.await;
        let err = recorder
            .record(Backend::Standard, Duration::from_secs(1), true)
            .await
            .unwrap_err();
        assert!(matches!(err, FnboxError::RecorderClosed));
    }
}
