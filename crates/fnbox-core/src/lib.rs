//! fnbox Core Library
//!
//! Sandbox lifecycle engine: each invocation gets its own workspace and image,
//! runs under a standard or sandboxed backend with a deadline, is always
//! cleaned up, and leaves exactly one metrics record behind.

pub mod builder;
pub mod cleanup;
pub mod config;
pub mod engine;
mod error;
pub mod executor;
pub mod fakes;
pub mod invocation;
pub mod metrics;
pub mod obs;
pub mod recorder;
pub mod runner;
pub mod telemetry;
pub mod template;
pub mod warm_pool;
pub mod workspace;

pub use error::{FnboxError, Result};

pub use builder::ImageBuilder;
pub use cleanup::{CleanupCoordinator, CleanupIssue, CleanupReport, CleanupStep, CleanupTicket};
pub use config::FnboxConfig;
pub use engine::{
    BuildSpec, CommandOutput, ContainerEngine, DockerCli, EngineError, EngineResult,
    ImageRemoval, RunSpec,
};
pub use executor::{FunctionExecutor, InvocationReport};
pub use invocation::{
    Backend, ContainerName, FailureKind, ImageTag, InvocationId, InvocationOutcome,
    InvocationRequest, InvocationResponse, InvocationState, Language, DEFAULT_TIMEOUT_SECS,
    TIMEOUT_DIAGNOSTIC,
};
pub use recorder::MetricsRecorder;
pub use runner::{RunOutcome, SandboxRunner};
pub use template::{ExecutionTemplate, TemplateSet};
pub use warm_pool::{PoolFailure, PoolReport, WarmPool, WARM_UP_PAYLOAD};
pub use workspace::{Workspace, WorkspaceManager};

pub use fnbox_state::{MetricsFilter, MetricsRecord, MetricsStore, PoolStore};
