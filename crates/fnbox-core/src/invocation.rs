//! Invocation domain types: identifiers, requests, lifecycle states and outcomes.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FnboxError, Result};

/// Diagnostic returned to the caller when a run exceeds its deadline.
pub const TIMEOUT_DIAGNOSTIC: &str = "❌ Error: Function timed out.";

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Process-unique invocation identifier (UUID v4, never reused).
///
/// Workspace directory, image tag and container name are all derived from it,
/// so two invocations can never collide on any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationId(Uuid);

impl InvocationId {
    pub fn new() -> Self {
        InvocationId(Uuid::new_v4())
    }

    /// Tag of the image built for this invocation.
    pub fn image_tag(&self) -> ImageTag {
        ImageTag(format!("temp-func-{}", self.0))
    }

    /// Name given to the container running this invocation.
    pub fn container_name(&self) -> ContainerName {
        ContainerName(format!("fnbox-run-{}", self.0))
    }

    /// Directory name of this invocation's workspace.
    pub fn workspace_name(&self) -> String {
        format!("fnbox-{}", self.0)
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Image tag on the container engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageTag(String);

impl ImageTag {
    pub fn new(tag: impl Into<String>) -> Self {
        ImageTag(tag.into())
    }

    /// Tag of warm pool slot `index` under `prefix` (`{prefix}-{index}`).
    pub fn pool_slot(prefix: &str, index: usize) -> Self {
        ImageTag(format!("{prefix}-{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Container name on the container engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerName(String);

impl ContainerName {
    pub fn new(name: impl Into<String>) -> Self {
        ContainerName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Backend / Language
// ---------------------------------------------------------------------------

/// Isolation runtime a container runs under.
///
/// Accepts the legacy names `docker` and `gvisor` on input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// The engine's default runtime.
    #[default]
    #[serde(alias = "docker")]
    Standard,
    /// An alternate, stronger-isolation runtime (e.g. gVisor's `runsc`).
    #[serde(alias = "gvisor")]
    Sandboxed,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Standard => "standard",
            Backend::Sandboxed => "sandboxed",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = FnboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "standard" | "docker" => Ok(Backend::Standard),
            "sandboxed" | "gvisor" => Ok(Backend::Sandboxed),
            other => Err(FnboxError::InvalidRequest(format!(
                "unknown backend {other:?} (expected standard or sandboxed)"
            ))),
        }
    }
}

/// Source language of the submitted code; selects the execution template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Python,
    #[serde(alias = "javascript")]
    Node,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::Python, Language::Node];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Node => "node",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = FnboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "node" | "javascript" | "js" => Ok(Language::Node),
            other => Err(FnboxError::InvalidRequest(format!(
                "unsupported language {other:?}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// A request to execute one code snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Submitted source code, written verbatim into the build context.
    pub code: String,
    /// Wall-clock budget for the run, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default, alias = "runtime")]
    pub backend: Backend,
    #[serde(default)]
    pub language: Language,
}

impl InvocationRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            timeout: DEFAULT_TIMEOUT_SECS,
            backend: Backend::default(),
            language: Language::default(),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Reject requests that can never run.
    pub fn validate(&self) -> Result<()> {
        if self.timeout == 0 {
            return Err(FnboxError::InvalidRequest(
                "timeout must be a positive number of seconds".into(),
            ));
        }
        if self.code.trim().is_empty() {
            return Err(FnboxError::InvalidRequest("code must not be empty".into()));
        }
        Ok(())
    }
}

/// What the caller receives back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub output: String,
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvocationState {
    Created,
    WorkspaceReady,
    Built,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cleaned,
}

impl InvocationState {
    /// Whether `self -> next` is a legal lifecycle step.
    ///
    /// Failure may short-circuit from `Created` (workspace) or
    /// `WorkspaceReady` (build); every non-terminal state may be cleaned.
    pub fn can_transition_to(self, next: InvocationState) -> bool {
        use InvocationState::*;
        matches!(
            (self, next),
            (Created, WorkspaceReady)
                | (Created, Failed)
                | (WorkspaceReady, Built)
                | (WorkspaceReady, Failed)
                | (Built, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, TimedOut)
                | (Succeeded, Cleaned)
                | (Failed, Cleaned)
                | (TimedOut, Cleaned)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == InvocationState::Cleaned
    }
}

/// Which stage made an invocation fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The submitted program exited non-zero.
    Program,
    /// The image could not be built.
    Build,
    /// The run exceeded its deadline.
    Timeout,
    /// The engine could not execute the run.
    Run,
}

/// Result of one invocation, before it is flattened to text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvocationOutcome {
    Succeeded { stdout: String },
    ProgramFailed { exit_code: i32, stderr: String },
    BuildFailed { diagnostic: String },
    TimedOut { limit_secs: u64 },
    RunFailed { reason: String },
}

impl InvocationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationOutcome::Succeeded { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            InvocationOutcome::Succeeded { .. } => None,
            InvocationOutcome::ProgramFailed { .. } => Some(FailureKind::Program),
            InvocationOutcome::BuildFailed { .. } => Some(FailureKind::Build),
            InvocationOutcome::TimedOut { .. } => Some(FailureKind::Timeout),
            InvocationOutcome::RunFailed { .. } => Some(FailureKind::Run),
        }
    }

    /// Lifecycle state this outcome settles the invocation in.
    pub fn settled_state(&self) -> InvocationState {
        match self {
            InvocationOutcome::Succeeded { .. } => InvocationState::Succeeded,
            InvocationOutcome::TimedOut { .. } => InvocationState::TimedOut,
            _ => InvocationState::Failed,
        }
    }

    /// Text shown to the caller: the captured stream, or one fixed
    /// diagnostic per failure kind.
    pub fn output(&self) -> String {
        match self {
            InvocationOutcome::Succeeded { stdout } => stdout.clone(),
            InvocationOutcome::ProgramFailed { stderr, .. } => stderr.clone(),
            InvocationOutcome::BuildFailed { diagnostic } => {
                format!("❌ Error: image build failed: {diagnostic}")
            }
            InvocationOutcome::TimedOut { .. } => TIMEOUT_DIAGNOSTIC.to_string(),
            InvocationOutcome::RunFailed { reason } => format!("❌ Error: {reason}"),
        }
    }
}
