//! End-to-end lifecycle tests for the function executor.
//!
//! Every test drives the full acquire → build → run → cleanup → record path
//! against the scripted `FakeEngine`, then inspects what the engine, the
//! workspace root and the metrics store were left with.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fnbox_core::fakes::{EngineCall, FakeBuild, FakeEngine, FakeRun};
use fnbox_core::{
    Backend, ContainerEngine, DockerCli, ExecutionTemplate, FailureKind, FnboxError,
    FunctionExecutor, InvocationOutcome, InvocationRequest, InvocationState, Language,
    MetricsRecorder, TemplateSet, WarmPool, WorkspaceManager, TIMEOUT_DIAGNOSTIC,
};
use fnbox_state::{
    JsonFileMetricsStore, MemoryMetricsStore, MemoryPoolStore, MetricsFilter, MetricsStore,
};

struct Env {
    root: tempfile::TempDir,
    engine: Arc<FakeEngine>,
    store: Arc<MemoryMetricsStore>,
    executor: FunctionExecutor,
}

impl Env {
    fn new(engine: FakeEngine) -> Self {
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
        Self {
            root,
            engine,
            store,
            executor,
        }
    }

    /// Nothing the invocations created is left behind.
    fn assert_nothing_left(&self) {
        let leftover: Vec<_> = std::fs::read_dir(self.root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert!(leftover.is_empty(), "workspaces left behind: {leftover:?}");
        let images: Vec<_> = self
            .engine
            .images()
            .into_iter()
            .filter(|t| t.starts_with("temp-func-"))
            .collect();
        assert!(images.is_empty(), "images left behind: {images:?}");
        assert!(self.engine.running_containers().is_empty());
    }
}

// ===========================================================================
// Outcomes
// ===========================================================================

#[tokio::test]
async fn exit_zero_returns_stdout_as_output() {
    let env = Env::new(FakeEngine::new().with_run(FakeRun::exit(0, "hello", "")));
    let report = env
        .executor
        .execute(InvocationRequest::new("print('hello', end='')"))
        .await
        .unwrap();

    assert!(report.success());
    assert_eq!(report.to_response().output, "hello");
    let records = env.store.snapshot();
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
    assert_eq!(records[0].backend, "standard");
    env.assert_nothing_left();
}

#[tokio::test]
async fn exit_one_returns_stderr_as_output() {
    let env = Env::new(FakeEngine::new().with_run(FakeRun::exit(1, "partial", "boom")));
    let report = env
        .executor
        .execute(InvocationRequest::new("import sys; sys.exit('boom')"))
        .await
        .unwrap();

    assert!(!report.success());
    assert_eq!(report.output(), "boom");
    assert_eq!(
        report.outcome,
        InvocationOutcome::ProgramFailed {
            exit_code: 1,
            stderr: "boom".into()
        }
    );
    assert!(!env.store.snapshot()[0].success);
    env.assert_nothing_left();
}

#[tokio::test]
async fn build_failure_is_reported_cleaned_and_recorded() {
    let env = Env::new(FakeEngine::new().with_build(FakeBuild::Fail {
        stderr: "ERROR: failed to solve: python:3.9-slim: not found".into(),
    }));
    let report = env
        .executor
        .execute(InvocationRequest::new("print(1)"))
        .await
        .unwrap();

    assert!(!report.success());
    assert!(report.output().contains("failed to solve"));
    assert_eq!(report.final_state(), Some(InvocationState::Cleaned));
    assert!(report.cleanup.workspace_released);
    // The tag is removed even though the build failed.
    assert!(env.engine.calls().iter().any(|c| matches!(
        c,
        EngineCall::RemoveImage { tag } if tag == report.id.image_tag().as_str()
    )));
    // No run was attempted.
    assert!(!env
        .engine
        .calls()
        .iter()
        .any(|c| matches!(c, EngineCall::Run { .. })));
    assert_eq!(env.store.len(), 1);
    env.assert_nothing_left();
}

#[tokio::test]
async fn timeout_returns_fixed_diagnostic_and_stops_container() {
    let env = Env::new(FakeEngine::new().with_run(FakeRun::Hang(Duration::from_secs(30))));
    let started = Instant::now();
    let report = env
        .executor
        .execute(InvocationRequest::new("import time; time.sleep(30)").with_timeout(1))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
    assert_eq!(report.output(), TIMEOUT_DIAGNOSTIC);
    assert_eq!(report.output(), "❌ Error: Function timed out.");
    assert!(!report.success());
    assert!(report.states.contains(&InvocationState::TimedOut));
    let container = report.id.container_name();
    assert!(env.engine.calls().contains(&EngineCall::StopContainer {
        container: container.as_str().to_string()
    }));
    assert!(!env.engine.is_running(&container).await.unwrap());
    assert!(!env.store.snapshot()[0].success);
    env.assert_nothing_left();
}

#[tokio::test]
async fn unconfirmed_timeout_stop_is_retried_by_cleanup() {
    let env = Env::new(
        FakeEngine::new()
            .with_run(FakeRun::Hang(Duration::from_secs(30)))
            .with_stop_failure(),
    );
    let report = env
        .executor
        .execute(InvocationRequest::new("import time; time.sleep(30)").with_timeout(1))
        .await
        .unwrap();

    assert_eq!(report.outcome.failure_kind(), Some(FailureKind::Timeout));
    let stop = EngineCall::StopContainer {
        container: report.id.container_name().as_str().to_string(),
    };
    let stops = env.engine.calls().iter().filter(|c| **c == stop).count();
    assert_eq!(stops, 2);
    assert!(report.cleanup.container_removed.is_none());
    assert!(!report.cleanup.issues.is_empty());
}

#[tokio::test]
async fn fast_run_finishes_well_inside_deadline() {
    let env = Env::new(FakeEngine::new().with_run(FakeRun::Hang(Duration::from_millis(50))));
    let report = env
        .executor
        .execute(InvocationRequest::new("print(1)").with_timeout(5))
        .await
        .unwrap();
    assert!(report.success());
    assert!(report.duration < Duration::from_secs(5));
}

#[tokio::test]
async fn sandboxed_backend_reaches_the_engine_and_the_record() {
    let env = Env::new(FakeEngine::new());
    let report = env
        .executor
        .execute(InvocationRequest::new("print(1)").with_backend(Backend::Sandboxed))
        .await
        .unwrap();
    assert!(env.engine.calls().contains(&EngineCall::Run {
        image: report.id.image_tag().as_str().to_string(),
        container: report.id.container_name().as_str().to_string(),
        backend: Backend::Sandboxed,
    }));
    assert_eq!(env.store.snapshot()[0].backend, "sandboxed");
}

/// Engine client stand-in: every call succeeds except `run`, which fails the
/// way the daemon does when the sandboxed runtime is not installed.
#[cfg(unix)]
fn rejecting_engine(dir: &std::path::Path) -> DockerCli {
    use std::os::unix::fs::PermissionsExt;
    let log = dir.join("calls.log");
    let script = format!(
        "#!/bin/sh\n\
         echo \"$@\" >> '{}'\n\
         if [ \"$1\" = run ]; then\n\
         echo 'docker: Error response from daemon: unknown or invalid runtime name: runsc.' >&2\n\
         exit 125\n\
         fi\n",
        log.display()
    );
    let path = dir.join("engine");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    DockerCli::new(path.to_string_lossy())
}

#[cfg(unix)]
#[tokio::test]
async fn daemon_rejection_is_a_run_failure_and_stops_the_container() {
    let bin = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryMetricsStore::new());
    let (recorder, _writer) = MetricsRecorder::spawn(store.clone());
    let executor = FunctionExecutor::new(
        Arc::new(rejecting_engine(bin.path())),
        WorkspaceManager::new(root.path()),
        TemplateSet::builtin(),
        recorder,
    );

    let report = executor
        .execute(InvocationRequest::new("print(1)").with_backend(Backend::Sandboxed))
        .await
        .unwrap();

    assert_eq!(report.outcome.failure_kind(), Some(FailureKind::Run));
    assert!(report.output().contains("invalid runtime name"));
    assert_eq!(report.cleanup.container_removed, Some(true));
    let calls = std::fs::read_to_string(bin.path().join("calls.log")).unwrap();
    let container = report.id.container_name();
    assert!(calls
        .lines()
        .any(|l| l == format!("rm -f {}", container.as_str())));
    assert!(!store.snapshot()[0].success);
}

// ===========================================================================
// Resource failures
// ===========================================================================

#[tokio::test]
async fn unusable_workspace_root_errors_but_still_records() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "file").unwrap();

    let engine = Arc::new(FakeEngine::new());
    let store = Arc::new(MemoryMetricsStore::new());
    let (recorder, _writer) = MetricsRecorder::spawn(store.clone());
    let executor = FunctionExecutor::new(
        engine.clone(),
        WorkspaceManager::new(&blocker),
        TemplateSet::builtin(),
        recorder,
    );

    let err = executor
        .execute(InvocationRequest::new("print(1)"))
        .await
        .unwrap_err();
    assert!(matches!(err, FnboxError::Resource { .. }));
    assert_eq!(store.len(), 1);
    assert!(!store.snapshot()[0].success);
    assert!(engine.calls().is_empty());
}

// ===========================================================================
// Concurrency
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_invocations_never_collide() {
    let env = Env::new(FakeEngine::new().with_run(FakeRun::Hang(Duration::from_millis(20))));
    let futures: Vec<_> = (0..16)
        .map(|i| {
            let executor = env.executor.clone();
            tokio::spawn(async move {
                executor
                    .execute(InvocationRequest::new(format!("print({i})")))
                    .await
                    .unwrap()
            })
        })
        .collect();
    let reports: Vec<_> = futures::future::join_all(futures)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let tags: HashSet<_> = reports.iter().map(|r| r.id.image_tag()).collect();
    let workspaces: HashSet<_> = reports.iter().map(|r| r.id.workspace_name()).collect();
    assert_eq!(tags.len(), 16);
    assert_eq!(workspaces.len(), 16);
    assert!(reports.iter().all(|r| r.success()));

    // Every build context held exactly its own code.
    let sources: HashSet<_> = env
        .engine
        .build_contexts()
        .into_iter()
        .filter_map(|c| c.source)
        .collect();
    assert_eq!(sources.len(), 16);

    assert_eq!(env.store.len(), 16);
    env.assert_nothing_left();
}

#[tokio::test]
async fn concurrent_completions_all_reach_the_metrics_file() {
    let root = tempfile::tempdir().unwrap();
    let metrics_path = root.path().join("metrics.json");
    let store = Arc::new(JsonFileMetricsStore::new(&metrics_path));
    let (recorder, _writer) = MetricsRecorder::spawn(store.clone());
    let executor = FunctionExecutor::new(
        Arc::new(FakeEngine::new()),
        WorkspaceManager::new(root.path().join("ws")),
        TemplateSet::builtin(),
        recorder,
    );

    let runs = (0..10).map(|_| executor.execute(InvocationRequest::new("print(1)")));
    for report in futures::future::join_all(runs).await {
        assert!(report.unwrap().success());
    }

    let on_disk: Vec<serde_json::Value> =
        serde_json::from_str(&std::fs::read_to_string(&metrics_path).unwrap()).unwrap();
    assert_eq!(on_disk.len(), 10);
    assert_eq!(
        store.list(&MetricsFilter::default()).await.unwrap().len(),
        10
    );
}

// ===========================================================================
// Warm pool
// ===========================================================================

#[tokio::test]
async fn precreate_pool_produces_three_unique_tags() {
    let env = Env::new(FakeEngine::new());
    let pool = WarmPool::new(
        env.engine.clone(),
        WorkspaceManager::new(env.root.path()),
        ExecutionTemplate::builtin(Language::Python),
        Arc::new(MemoryPoolStore::new()),
    );
    let report = pool.precreate_pool("base-python", 3).await;
    let unique: HashSet<_> = report.ready.iter().collect();
    assert_eq!(report.ready.len(), 3);
    assert_eq!(unique.len(), 3);
}

#[tokio::test]
async fn failing_pool_never_blocks_invocations() {
    let env = Env::new(
        FakeEngine::new()
            .with_build(FakeBuild::FailTagsWithPrefix {
                prefix: "base-python".into(),
                stderr: "pool build exploded".into(),
            })
            .with_pull_failure()
            .with_run(FakeRun::exit(0, "served", "")),
    );
    let pool = WarmPool::new(
        env.engine.clone(),
        WorkspaceManager::new(env.root.path()),
        ExecutionTemplate::builtin(Language::Python),
        Arc::new(MemoryPoolStore::new()),
    );
    let warming = pool.spawn("base-python", 3);

    let report = env
        .executor
        .execute(InvocationRequest::new("print('served')"))
        .await
        .unwrap();
    assert_eq!(report.output(), "served");

    let pool_report = warming.await.unwrap();
    assert!(pool_report.ready.is_empty());
    assert_eq!(pool_report.failed.len(), 3);
    assert!(pool_report.pull_error.is_some());
}
