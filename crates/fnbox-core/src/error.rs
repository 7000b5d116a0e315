//! Error taxonomy for the sandbox lifecycle engine.

use std::path::PathBuf;

use crate::engine::EngineError;

/// Errors produced by fnbox-core.
///
/// `Build`, `Timeout` and `Run` never escape an invocation: the executor
/// turns them into an [`InvocationOutcome`](crate::InvocationOutcome).
#[derive(Debug, thiserror::Error)]
pub enum FnboxError {
    #[error("workspace error at {path}: {reason}")]
    Resource { path: PathBuf, reason: String },

    #[error("image build failed: {diagnostic}")]
    Build { diagnostic: String },

    /// `container_stopped` is whether the engine confirmed the container is
    /// gone after the deadline.
    #[error("run exceeded its {limit_secs}s deadline")]
    Timeout {
        limit_secs: u64,
        container_stopped: bool,
    },

    #[error("container engine failed to run the image: {0}")]
    Run(#[source] EngineError),

    #[error("invalid invocation request: {0}")]
    InvalidRequest(String),

    #[error("metrics store error: {0}")]
    Metrics(#[from] fnbox_state::StorageError),

    #[error("metrics recorder is shut down")]
    RecorderClosed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("container engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FnboxError {
    pub(crate) fn resource(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        FnboxError::Resource {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for fnbox-core operations.
pub type Result<T> = std::result::Result<T, FnboxError>;
