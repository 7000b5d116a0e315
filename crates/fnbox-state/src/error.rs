//! Error types for fnbox-state

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the metrics log and pool stores.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Filesystem error while reading or replacing the metrics file
    #[error("metrics io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The metrics file exists but is not a JSON array of records
    #[error("metrics file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Record (de)serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The blocking writer task panicked or was cancelled
    #[error("metrics writer task failed: {0}")]
    WriterTask(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_error_names_path() {
        let err = StorageError::Corrupt {
            path: PathBuf::from("/var/lib/fnbox/metrics.json"),
            reason: "expected value at line 1 column 1".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/var/lib/fnbox/metrics.json"));
        assert!(msg.contains("corrupt"));
    }

    #[test]
    fn test_io_error_keeps_source() {
        let err = StorageError::io(
            "metrics.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("denied"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
