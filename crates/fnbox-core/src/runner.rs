//! Sandbox runner: one container run bounded by a deadline.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::{ContainerEngine, RunSpec};
use crate::error::{FnboxError, Result};
use crate::invocation::{Backend, ContainerName, ImageTag};

/// A container that exited on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Clone)]
pub struct SandboxRunner {
    engine: Arc<dyn ContainerEngine>,
}

impl SandboxRunner {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Run `image` as `container` under `backend`, for at most `timeout`.
    ///
    /// A non-zero exit is still `Ok`. On expiry the engine call is dropped,
    /// the container is stopped by name and [`FnboxError::Timeout`] is
    /// returned; a failure to drive the engine is [`FnboxError::Run`].
    pub async fn run(
        &self,
        image: &ImageTag,
        container: &ContainerName,
        backend: Backend,
        timeout: Duration,
    ) -> Result<RunOutcome> {
        let spec = RunSpec {
            image: image.clone(),
            container: container.clone(),
            backend,
        };
        debug!(image = %image, container = %container, %backend, ?timeout, "starting run");

        match tokio::time::timeout(timeout, self.engine.run(&spec)).await {
            Ok(Ok(output)) => Ok(RunOutcome {
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            }),
            Ok(Err(e)) => Err(FnboxError::Run(e)),
            Err(_elapsed) => Err(FnboxError::Timeout {
                limit_secs: timeout.as_secs(),
                container_stopped: self.stop_and_confirm(container).await,
            }),
        }
    }

    /// Stop `container`, then check the engine no longer lists it.
    async fn stop_and_confirm(&self, container: &ContainerName) -> bool {
        if let Err(e) = self.engine.stop_container(container).await {
            warn!(container = %container, error = %e, "could not stop timed-out container");
            return false;
        }
        match self.engine.is_running(container).await {
            Ok(false) => true,
            Ok(true) => {
                warn!(container = %container, "timed-out container still running after stop");
                false
            }
            Err(e) => {
                warn!(container = %container, error = %e, "could not confirm container stop");
                false
            }
        }
    }
}
