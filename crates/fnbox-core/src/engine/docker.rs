//! Docker-compatible CLI engine (`docker`, `podman`).

use std::ffi::OsString;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{
    BuildSpec, CommandOutput, ContainerEngine, EngineError, EngineResult, ImageRemoval, RunSpec,
};
use crate::invocation::{Backend, ContainerName, ImageTag};

/// Default engine binary.
pub const DEFAULT_PROGRAM: &str = "docker";

/// Default runtime for [`Backend::Sandboxed`] (gVisor).
pub const DEFAULT_SANDBOXED_RUNTIME: &str = "runsc";

/// Exit status `docker run` uses when the daemon itself fails, as opposed
/// to the containerized program exiting non-zero.
pub const ENGINE_ERROR_STATUS: i32 = 125;

/// Drives a Docker-compatible engine through its command-line client.
///
/// Every call spawns one client process with `kill_on_drop`, so abandoning a
/// call (e.g. on timeout) reaps the client; the container itself must still
/// be stopped with [`ContainerEngine::stop_container`].
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    sandboxed_runtime: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl DockerCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            sandboxed_runtime: DEFAULT_SANDBOXED_RUNTIME.to_string(),
        }
    }

    /// Runtime name passed as `--runtime=<name>` for sandboxed runs.
    pub fn with_sandboxed_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.sandboxed_runtime = runtime.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn build_args(spec: &BuildSpec) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["build".into(), "-t".into(), spec.tag.as_str().into()];
        if let Some(dockerfile) = &spec.dockerfile {
            args.push("-f".into());
            args.push(dockerfile.as_os_str().to_owned());
        }
        args.push(spec.context_dir.as_os_str().to_owned());
        args
    }

    pub fn run_args(&self, spec: &RunSpec) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "run".into(),
            "--rm".into(),
            "--name".into(),
            spec.container.as_str().into(),
        ];
        if spec.backend == Backend::Sandboxed {
            args.push(format!("--runtime={}", self.sandboxed_runtime).into());
        }
        args.push(spec.image.as_str().into());
        args
    }

    async fn exec(
        &self,
        operation: &'static str,
        args: Vec<OsString>,
    ) -> EngineResult<CommandOutput> {
        debug!(program = %self.program, operation, ?args, "engine command");
        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| EngineError::Spawn {
                program: self.program.clone(),
                operation,
                source,
            })?;
        Ok(output.into())
    }
}

/// Classify the result of `rmi -f`.
pub fn classify_image_removal(output: &CommandOutput) -> EngineResult<ImageRemoval> {
    if output.success() {
        return Ok(ImageRemoval::Removed);
    }
    let stderr = output.stderr.to_ascii_lowercase();
    if stderr.contains("no such image") || stderr.contains("image not known") {
        Ok(ImageRemoval::NotFound)
    } else if stderr.contains("being used") || stderr.contains("in use") {
        Ok(ImageRemoval::InUse)
    } else {
        Err(EngineError::CommandFailed {
            operation: "rmi",
            exit_code: output.exit_code,
            stderr: output.diagnostic(),
        })
    }
}

/// Classify the result of `rm -f`: `Ok(true)` removed, `Ok(false)` absent.
pub fn classify_container_removal(output: &CommandOutput) -> EngineResult<bool> {
    if output.success() {
        return Ok(true);
    }
    let stderr = output.stderr.to_ascii_lowercase();
    if stderr.contains("no such container") || stderr.contains("no container with name") {
        Ok(false)
    } else {
        Err(EngineError::CommandFailed {
            operation: "rm",
            exit_code: output.exit_code,
            stderr: output.diagnostic(),
        })
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn build(&self, spec: &BuildSpec) -> EngineResult<CommandOutput> {
        self.exec("build", Self::build_args(spec)).await
    }

    async fn run(&self, spec: &RunSpec) -> EngineResult<CommandOutput> {
        let output = self.exec("run", self.run_args(spec)).await?;
        if output.exit_code == Some(ENGINE_ERROR_STATUS) {
            return Err(EngineError::CommandFailed {
                operation: "run",
                exit_code: output.exit_code,
                stderr: output.diagnostic(),
            });
        }
        Ok(output)
    }

    async fn stop_container(&self, name: &ContainerName) -> EngineResult<bool> {
        let output = self
            .exec("rm", vec!["rm".into(), "-f".into(), name.as_str().into()])
            .await?;
        classify_container_removal(&output)
    }

    async fn remove_image(&self, tag: &ImageTag) -> EngineResult<ImageRemoval> {
        let output = self
            .exec("rmi", vec!["rmi".into(), "-f".into(), tag.as_str().into()])
            .await?;
        classify_image_removal(&output)
    }

    async fn pull(&self, image: &str) -> EngineResult<()> {
        let output = self.exec("pull", vec!["pull".into(), image.into()]).await?;
        if output.success() {
            Ok(())
        } else {
            Err(EngineError::CommandFailed {
                operation: "pull",
                exit_code: output.exit_code,
                stderr: output.diagnostic(),
            })
        }
    }

    async fn is_running(&self, name: &ContainerName) -> EngineResult<bool> {
        let filter = format!("name=^{}$", name.as_str());
        let output = self
            .exec(
                "ps",
                vec!["ps".into(), "-q".into(), "--filter".into(), filter.into()],
            )
            .await?;
        if !output.success() {
            return Err(EngineError::CommandFailed {
                operation: "ps",
                exit_code: output.exit_code,
                stderr: output.diagnostic(),
            });
        }
        Ok(!output.stdout.trim().is_empty())
    }
}
