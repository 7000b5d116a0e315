//! Function executor: the one path every invocation takes.
//!
//! ```text
//! acquire workspace → build image → bounded run → cleanup → metrics record
//! ```
//!
//! Build, run and timeout failures are folded into the returned
//! [`InvocationOutcome`]; cleanup and the metrics record happen on every path
//! past workspace acquisition.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fnbox_state::MetricsRecord;
use serde::Serialize;
use tracing::{error, Instrument};

use crate::builder::ImageBuilder;
use crate::cleanup::{CleanupCoordinator, CleanupReport, CleanupTicket};
use crate::engine::ContainerEngine;
use crate::error::{FnboxError, Result};
use crate::invocation::{
    Backend, InvocationId, InvocationOutcome, InvocationRequest, InvocationResponse,
    InvocationState, Language,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::recorder::MetricsRecorder;
use crate::runner::{RunOutcome, SandboxRunner};
use crate::template::TemplateSet;
use crate::workspace::WorkspaceManager;

/// Everything known about one finished invocation.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationReport {
    pub id: InvocationId,
    pub backend: Backend,
    pub language: Language,
    pub outcome: InvocationOutcome,
    /// Wall-clock time from acquisition to the end of cleanup.
    pub duration: Duration,
    /// Lifecycle states visited, in order. Always ends in `Cleaned`.
    pub states: Vec<InvocationState>,
    pub cleanup: CleanupReport,
    /// `None` when the record could not be persisted.
    pub metrics: Option<MetricsRecord>,
}

impl InvocationReport {
    pub fn success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn output(&self) -> String {
        self.outcome.output()
    }

    pub fn final_state(&self) -> Option<InvocationState> {
        self.states.last().copied()
    }

    pub fn to_response(&self) -> InvocationResponse {
        InvocationResponse {
            output: self.output(),
        }
    }
}

/// Append `next` to the visited states.
fn advance(states: &mut Vec<InvocationState>, next: InvocationState) {
    if let Some(current) = states.last() {
        debug_assert!(
            current.can_transition_to(next),
            "illegal transition {current:?} -> {next:?}"
        );
    }
    states.push(next);
}

#[derive(Clone)]
pub struct FunctionExecutor {
    workspaces: WorkspaceManager,
    templates: Arc<TemplateSet>,
    builder: ImageBuilder,
    runner: SandboxRunner,
    cleanup: CleanupCoordinator,
    recorder: MetricsRecorder,
}

impl FunctionExecutor {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        workspaces: WorkspaceManager,
        templates: TemplateSet,
        recorder: MetricsRecorder,
    ) -> Self {
        Self {
            builder: ImageBuilder::new(engine.clone()),
            runner: SandboxRunner::new(engine.clone()),
            cleanup: CleanupCoordinator::new(engine, workspaces.clone()),
            workspaces,
            templates: Arc::new(templates),
            recorder,
        }
    }

    pub fn recorder(&self) -> &MetricsRecorder {
        &self.recorder
    }

    /// Execute one request and flatten the result into a response.
    pub async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResponse> {
        Ok(self.execute(request).await?.to_response())
    }

    /// Execute one request end to end.
    ///
    /// Errors only for an invalid request (nothing allocated, nothing
    /// recorded) or an unusable workspace root (a failure record is still
    /// written). Every other failure is an outcome in the report.
    pub async fn execute(&self, request: InvocationRequest) -> Result<InvocationReport> {
        request.validate()?;
        let id = InvocationId::new();
        let span = obs::invocation_span(&id, request.backend);
        self.execute_as(id, request).instrument(span).await
    }

    async fn execute_as(
        &self,
        id: InvocationId,
        request: InvocationRequest,
    ) -> Result<InvocationReport> {
        let started = Instant::now();
        let backend = request.backend;
        let mut states = vec![InvocationState::Created];
        METRICS.inc_started();
        obs::emit_invocation_started(&id, backend, request.language, request.timeout);

        let workspace = match self.workspaces.acquire(&id.workspace_name()).await {
            Ok(ws) => ws,
            Err(e) => {
                error!(error = %e, "workspace acquisition failed");
                METRICS.inc_failed();
                let elapsed = started.elapsed();
                self.record(backend, elapsed, false).await;
                obs::emit_invocation_finished(&id, elapsed.as_millis() as u64, false, None);
                return Err(e);
            }
        };
        advance(&mut states, InvocationState::WorkspaceReady);

        let template = self.templates.get(request.language);
        let build_started = Instant::now();
        let mut container_may_run = false;

        let outcome = match self
            .builder
            .build(&workspace, &request.code, template, &id)
            .await
        {
            Err(e) => {
                let diagnostic = match e {
                    FnboxError::Build { diagnostic } => diagnostic,
                    other => other.to_string(),
                };
                obs::emit_build_failed(&id, &diagnostic);
                InvocationOutcome::BuildFailed { diagnostic }
            }
            Ok(tag) => {
                obs::emit_image_built(&id, &tag, build_started.elapsed().as_millis() as u64);
                advance(&mut states, InvocationState::Built);
                advance(&mut states, InvocationState::Running);

                let limit = Duration::from_secs(request.timeout);
                match self
                    .runner
                    .run(&tag, &id.container_name(), backend, limit)
                    .await
                {
                    Ok(RunOutcome {
                        exit_code: Some(0),
                        stdout,
                        ..
                    }) => InvocationOutcome::Succeeded { stdout },
                    Ok(RunOutcome {
                        exit_code, stderr, ..
                    }) => InvocationOutcome::ProgramFailed {
                        exit_code: exit_code.unwrap_or(-1),
                        stderr,
                    },
                    Err(FnboxError::Timeout {
                        limit_secs,
                        container_stopped,
                    }) => {
                        obs::emit_run_timed_out(&id, limit_secs, container_stopped);
                        container_may_run = !container_stopped;
                        InvocationOutcome::TimedOut { limit_secs }
                    }
                    Err(e) => {
                        container_may_run = true;
                        InvocationOutcome::RunFailed {
                            reason: e.to_string(),
                        }
                    }
                }
            }
        };
        advance(&mut states, outcome.settled_state());

        let ticket = CleanupTicket {
            container: container_may_run.then(|| id.container_name()),
            image: Some(id.image_tag()),
            workspace: Some(workspace),
        };
        let cleanup = self.cleanup.cleanup(&id, ticket).await;
        advance(&mut states, InvocationState::Cleaned);

        let duration = started.elapsed();
        METRICS.observe(&outcome);
        let metrics = self.record(backend, duration, outcome.is_success()).await;
        obs::emit_invocation_finished(
            &id,
            duration.as_millis() as u64,
            outcome.is_success(),
            outcome.failure_kind(),
        );

        Ok(InvocationReport {
            id,
            backend,
            language: request.language,
            outcome,
            duration,
            states,
            cleanup,
            metrics,
        })
    }

    /// Persist the metrics record; failures are logged, never returned.
    async fn record(
        &self,
        backend: Backend,
        duration: Duration,
        success: bool,
    ) -> Option<MetricsRecord> {
        match self.recorder.record(backend, duration, success).await {
            Ok(record) => Some(record),
            Err(e) => {
                error!(error = %e, "metrics record lost");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeBuild, FakeEngine, FakeRun};
    use fnbox_state::MemoryMetricsStore;

    struct Harness {
        _root: tempfile::TempDir,
        engine: Arc<FakeEngine>,
        store: Arc<MemoryMetricsStore>,
        executor: FunctionExecutor,
    }

    fn harness(engine: FakeEngine) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let engine = Arc::new(engine);
        let store = Arc::new(MemoryMetricsStore::new());
        let (recorder, _writer) = MetricsRecorder::spawn(store.clone());
        let executor = FunctionExecutor::new(
            engine.clone(),
            WorkspaceManager::new(root.path()),
            TemplateSet::builtin(),
            recorder,
        );
        Harness {
            _root: root,
            engine,
            store,
            executor,
        }
    }

    #[tokio::test]
    async fn test_success_visits_every_state() {
        let h = harness(FakeEngine::new().with_run(FakeRun::exit(0, "hello", "")));
        let report = h
            .executor
            .execute(InvocationRequest::new("print('hello')"))
            .await
            .unwrap();
        use InvocationState::*;
        assert_eq!(
            report.states,
            vec![Created, WorkspaceReady, Built, Running, Succeeded, Cleaned]
        );
        assert_eq!(report.output(), "hello");
        assert_eq!(report.final_state(), Some(Cleaned));
        assert!(report.metrics.is_some());
    }

    #[tokio::test]
    async fn test_build_failure_short_circuits_to_failed() {
        let h = harness(FakeEngine::new().with_build(FakeBuild::Fail {
            stderr: "SyntaxError: bad template".into(),
        }));
        let report = h
            .executor
            .execute(InvocationRequest::new("print(1)"))
            .await
            .unwrap();
        use InvocationState::*;
        assert_eq!(report.states, vec![Created, WorkspaceReady, Failed, Cleaned]);
        assert!(matches!(report.outcome, InvocationOutcome::BuildFailed { .. }));
        assert!(report.output().contains("SyntaxError: bad template"));
        assert_eq!(h.store.len(), 1);
        assert!(!h.store.snapshot()[0].success);
    }

    #[tokio::test]
    async fn test_invalid_request_allocates_nothing() {
        let h = harness(FakeEngine::new());
        let err = h
            .executor
            .execute(InvocationRequest::new("print(1)").with_timeout(0))
            .await
            .unwrap_err();
        assert!(matches!(err, FnboxError::InvalidRequest(_)));
        let err = h.executor.execute(InvocationRequest::new("  ")).await.unwrap_err();
        assert!(matches!(err, FnboxError::InvalidRequest(_)));
        assert!(h.store.is_empty());
        assert!(h.engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_engine_run_failure_stops_container() {
        let h = harness(FakeEngine::new().with_run(FakeRun::EngineFailure(
            "Cannot connect to the Docker daemon".into(),
        )));
        let report = h
            .executor
            .execute(InvocationRequest::new("print(1)"))
            .await
            .unwrap();
        assert!(matches!(report.outcome, InvocationOutcome::RunFailed { .. }));
        assert!(report.output().starts_with("❌ Error: "));
        assert_eq!(report.cleanup.container_removed, Some(false));
        assert_eq!(h.engine.image_count(), 0);
    }

    #[tokio::test]
    async fn test_node_language_uses_node_template() {
        let h = harness(FakeEngine::new().with_run(FakeRun::exit(0, "42\n", "")));
        let report = h
            .executor
            .execute(InvocationRequest::new("console.log(42)").with_language(Language::Node))
            .await
            .unwrap();
        assert_eq!(report.output(), "42\n");
        let ctx = h.engine.last_build_context().unwrap();
        assert!(ctx.files.contains(&"function.js".to_string()));
        assert_eq!(ctx.source.as_deref(), Some("console.log(42)"));
    }

    #[tokio::test]
    async fn test_invoke_flattens_to_response() {
        let h = harness(FakeEngine::new().with_run(FakeRun::exit(1, "", "boom")));
        let response = h
            .executor
            .invoke(InvocationRequest::new("raise SystemExit('boom')"))
            .await
            .unwrap();
        assert_eq!(response.output, "boom");
    }
}
