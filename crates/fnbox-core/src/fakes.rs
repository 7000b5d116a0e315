//! In-memory container engine for tests.
//!
//! `FakeEngine` scripts build and run behaviour, records every call, and
//! tracks which images exist and which containers are still running, so the
//! lifecycle guarantees can be checked without a real engine.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::engine::docker::ENGINE_ERROR_STATUS;
use crate::engine::{
    BuildSpec, CommandOutput, ContainerEngine, EngineError, EngineResult, ImageRemoval, RunSpec,
};
use crate::invocation::{Backend, ContainerName, ImageTag};

/// Scripted result of `build`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeBuild {
    Succeed,
    /// Exit non-zero with this stderr.
    Fail { stderr: String },
    /// Builds whose tag starts with `prefix` fail; the rest succeed.
    FailTagsWithPrefix { prefix: String, stderr: String },
    /// The engine binary cannot be started.
    Unstartable,
}

/// Scripted result of `run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeRun {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// Keep the container running for this long, then exit 0.
    Hang(Duration),
    /// The engine cannot execute the run at all.
    EngineFailure(String),
}

impl FakeRun {
    pub fn exit(code: i32, stdout: &str, stderr: &str) -> Self {
        FakeRun::Exit {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }
}

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Build { tag: String },
    Run {
        image: String,
        container: String,
        backend: Backend,
    },
    StopContainer { container: String },
    RemoveImage { tag: String },
    Pull { image: String },
    IsRunning { container: String },
}

/// Files found in a build context at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    pub tag: String,
    /// File names in the context, sorted.
    pub files: Vec<String>,
    /// Content of the submitted source file (`function.*`), if any.
    pub source: Option<String>,
}

#[derive(Debug)]
struct Script {
    build: FakeBuild,
    run: FakeRun,
    image_in_use: bool,
    fail_pull: bool,
    fail_stop: bool,
    fail_remove: bool,
}

#[derive(Debug)]
pub struct FakeEngine {
    script: Mutex<Script>,
    calls: Mutex<Vec<EngineCall>>,
    contexts: Mutex<Vec<BuildContext>>,
    images: Mutex<BTreeSet<String>>,
    running: Mutex<BTreeSet<String>>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a container from the running set when the run finishes normally.
/// Not triggered when the run future is dropped, mirroring a real engine.
struct RunningGuard<'a> {
    engine: &'a FakeEngine,
    name: String,
}

impl RunningGuard<'_> {
    fn finish(self) {
        self.engine.running.lock().unwrap().remove(&self.name);
    }
}

impl FakeEngine {
    /// Builds succeed, runs exit 0 with empty output.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                build: FakeBuild::Succeed,
                run: FakeRun::exit(0, "", ""),
                image_in_use: false,
                fail_pull: false,
                fail_stop: false,
                fail_remove: false,
            }),
            calls: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
            images: Mutex::new(BTreeSet::new()),
            running: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn with_build(self, build: FakeBuild) -> Self {
        self.script.lock().unwrap().build = build;
        self
    }

    pub fn with_run(self, run: FakeRun) -> Self {
        self.script.lock().unwrap().run = run;
        self
    }

    /// `remove_image` reports every image as in use by a container.
    pub fn with_image_in_use(self) -> Self {
        self.script.lock().unwrap().image_in_use = true;
        self
    }

    pub fn with_pull_failure(self) -> Self {
        self.script.lock().unwrap().fail_pull = true;
        self
    }

    pub fn with_stop_failure(self) -> Self {
        self.script.lock().unwrap().fail_stop = true;
        self
    }

    pub fn with_remove_failure(self) -> Self {
        self.script.lock().unwrap().fail_remove = true;
        self
    }

    /// Pretend `tag` already exists on the engine.
    pub fn seed_image(&self, tag: &str) {
        self.images.lock().unwrap().insert(tag.to_string());
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn images(&self) -> Vec<String> {
        self.images.lock().unwrap().iter().cloned().collect()
    }

    pub fn image_count(&self) -> usize {
        self.images.lock().unwrap().len()
    }

    pub fn has_image(&self, tag: &ImageTag) -> bool {
        self.images.lock().unwrap().contains(tag.as_str())
    }

    pub fn running_containers(&self) -> Vec<String> {
        self.running.lock().unwrap().iter().cloned().collect()
    }

    pub fn build_contexts(&self) -> Vec<BuildContext> {
        self.contexts.lock().unwrap().clone()
    }

    pub fn last_build_context(&self) -> Option<BuildContext> {
        self.contexts.lock().unwrap().last().cloned()
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn snapshot_context(spec: &BuildSpec) -> BuildContext {
        let mut files = Vec::new();
        let mut source = None;
        if let Ok(entries) = std::fs::read_dir(&spec.context_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with("function.") {
                    source = std::fs::read_to_string(entry.path()).ok();
                }
                files.push(name);
            }
        }
        files.sort();
        BuildContext {
            tag: spec.tag.as_str().to_string(),
            files,
            source,
        }
    }

    fn spawn_error(operation: &'static str) -> EngineError {
        EngineError::Spawn {
            program: "fake-engine".into(),
            operation,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "fake engine unavailable"),
        }
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn build(&self, spec: &BuildSpec) -> EngineResult<CommandOutput> {
        self.record(EngineCall::Build {
            tag: spec.tag.as_str().to_string(),
        });
        let behaviour = self.script.lock().unwrap().build.clone();
        if behaviour == FakeBuild::Unstartable {
            return Err(Self::spawn_error("build"));
        }
        self.contexts
            .lock()
            .unwrap()
            .push(Self::snapshot_context(spec));

        let failure = match behaviour {
            FakeBuild::Fail { stderr } => Some(stderr),
            FakeBuild::FailTagsWithPrefix { prefix, stderr }
                if spec.tag.as_str().starts_with(&prefix) =>
            {
                Some(stderr)
            }
            _ => None,
        };
        match failure {
            Some(stderr) => Ok(CommandOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr,
            }),
            None => {
                self.images
                    .lock()
                    .unwrap()
                    .insert(spec.tag.as_str().to_string());
                Ok(CommandOutput {
                    exit_code: Some(0),
                    stdout: format!("Successfully tagged {}\n", spec.tag),
                    stderr: String::new(),
                })
            }
        }
    }

    async fn run(&self, spec: &RunSpec) -> EngineResult<CommandOutput> {
        self.record(EngineCall::Run {
            image: spec.image.as_str().to_string(),
            container: spec.container.as_str().to_string(),
            backend: spec.backend,
        });
        let behaviour = self.script.lock().unwrap().run.clone();
        if let FakeRun::EngineFailure(reason) = &behaviour {
            return Err(EngineError::CommandFailed {
                operation: "run",
                exit_code: Some(ENGINE_ERROR_STATUS),
                stderr: reason.clone(),
            });
        }
        if !self.images.lock().unwrap().contains(spec.image.as_str()) {
            return Err(EngineError::CommandFailed {
                operation: "run",
                exit_code: Some(ENGINE_ERROR_STATUS),
                stderr: format!("Unable to find image '{}' locally", spec.image),
            });
        }

        self.running
            .lock()
            .unwrap()
            .insert(spec.container.as_str().to_string());
        let guard = RunningGuard {
            engine: self,
            name: spec.container.as_str().to_string(),
        };

        let output = match behaviour {
            FakeRun::Exit {
                code,
                stdout,
                stderr,
            } => CommandOutput {
                exit_code: Some(code),
                stdout,
                stderr,
            },
            FakeRun::Hang(duration) => {
                tokio::time::sleep(duration).await;
                CommandOutput {
                    exit_code: Some(0),
                    ..Default::default()
                }
            }
            FakeRun::EngineFailure(_) => CommandOutput::default(),
        };
        guard.finish();
        Ok(output)
    }

    async fn stop_container(&self, name: &ContainerName) -> EngineResult<bool> {
        self.record(EngineCall::StopContainer {
            container: name.as_str().to_string(),
        });
        if self.script.lock().unwrap().fail_stop {
            return Err(EngineError::CommandFailed {
                operation: "rm",
                exit_code: Some(1),
                stderr: "daemon unreachable".into(),
            });
        }
        Ok(self.running.lock().unwrap().remove(name.as_str()))
    }

    async fn remove_image(&self, tag: &ImageTag) -> EngineResult<ImageRemoval> {
        self.record(EngineCall::RemoveImage {
            tag: tag.as_str().to_string(),
        });
        let (in_use, fail) = {
            let script = self.script.lock().unwrap();
            (script.image_in_use, script.fail_remove)
        };
        if fail {
            return Err(EngineError::CommandFailed {
                operation: "rmi",
                exit_code: Some(1),
                stderr: "daemon unreachable".into(),
            });
        }
        let mut images = self.images.lock().unwrap();
        if !images.contains(tag.as_str()) {
            Ok(ImageRemoval::NotFound)
        } else if in_use {
            Ok(ImageRemoval::InUse)
        } else {
            images.remove(tag.as_str());
            Ok(ImageRemoval::Removed)
        }
    }

    async fn pull(&self, image: &str) -> EngineResult<()> {
        self.record(EngineCall::Pull {
            image: image.to_string(),
        });
        if self.script.lock().unwrap().fail_pull {
            return Err(EngineError::CommandFailed {
                operation: "pull",
                exit_code: Some(1),
                stderr: format!("pull access denied for {image}"),
            });
        }
        self.images.lock().unwrap().insert(image.to_string());
        Ok(())
    }

    async fn is_running(&self, name: &ContainerName) -> EngineResult<bool> {
        self.record(EngineCall::IsRunning {
            container: name.as_str().to_string(),
        });
        Ok(self.running.lock().unwrap().contains(name.as_str()))
    }
}
