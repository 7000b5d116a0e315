//! Container engine port.
//!
//! Every lifecycle component talks to the container engine through
//! [`ContainerEngine`]. [`DockerCli`] drives a Docker-compatible CLI binary;
//! [`crate::fakes::FakeEngine`] scripts the engine in tests.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::invocation::{Backend, ContainerName, ImageTag};

pub mod docker;

pub use docker::DockerCli;

/// Errors raised when the engine itself misbehaves, as opposed to the
/// program inside the container failing.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to start `{program} {operation}`: {source}")]
    Spawn {
        program: String,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("`{operation}` exited with {exit_code:?}: {stderr}")]
    CommandFailed {
        operation: &'static str,
        exit_code: Option<i32>,
        stderr: String,
    },
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Exit status and captured streams of one engine command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Best diagnostic text: stderr, or stdout when stderr is empty.
    pub fn diagnostic(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        }
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

/// Inputs of an image build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    /// Directory sent to the engine as build context.
    pub context_dir: PathBuf,
    pub tag: ImageTag,
    /// Build descriptor outside the context; `None` uses `<context>/Dockerfile`.
    pub dockerfile: Option<PathBuf>,
}

/// Inputs of a container run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub image: ImageTag,
    pub container: ContainerName,
    pub backend: Backend,
}

/// What happened to a forced image removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageRemoval {
    Removed,
    /// The tag did not exist (never built, or already removed).
    NotFound,
    /// A container still references the image.
    InUse,
}

/// Operations fnbox needs from a container engine.
///
/// `build` and `run` report the command's exit status in [`CommandOutput`];
/// a failure to drive the engine, or the engine rejecting the run itself,
/// is an [`EngineError`].
/// `stop_container` and `remove_image` are idempotent.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Build `spec.context_dir` into an image tagged `spec.tag`.
    async fn build(&self, spec: &BuildSpec) -> EngineResult<CommandOutput>;

    /// Run the image to completion with automatic removal on exit.
    ///
    /// `Ok` carries the program's own exit status. The engine failing to
    /// create or start the container is `Err`.
    ///
    /// Dropping the returned future abandons the client call; the container
    /// may keep running until [`ContainerEngine::stop_container`] is called.
    async fn run(&self, spec: &RunSpec) -> EngineResult<CommandOutput>;

    /// Kill and remove a container by name. Returns `false` if no such
    /// container existed.
    async fn stop_container(&self, name: &ContainerName) -> EngineResult<bool>;

    /// Force-remove an image by tag.
    async fn remove_image(&self, tag: &ImageTag) -> EngineResult<ImageRemoval>;

    /// Pull an image from its registry.
    async fn pull(&self, image: &str) -> EngineResult<()>;

    /// Whether a container with exactly this name is running.
    async fn is_running(&self, name: &ContainerName) -> EngineResult<bool>;
}
