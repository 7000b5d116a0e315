//! fnbox - run untrusted code snippets in disposable containers
//!
//! ## Commands
//!
//! - `exec`: run one snippet and print its output
//! - `batch`: run JSON requests, one per line, with bounded concurrency
//! - `warm`: pull the base image and pre-build the warm pool
//! - `metrics`: query the metrics log

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tracing::{info, warn, Level};

use fnbox_core::metrics::METRICS;
use fnbox_core::{
    Backend, ContainerEngine, FnboxConfig, FunctionExecutor, InvocationRequest, Language,
    MetricsFilter, MetricsRecorder, WarmPool, WorkspaceManager,
};
use fnbox_state::{JsonFileMetricsStore, MemoryPoolStore};

#[derive(Parser)]
#[command(name = "fnbox")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run code snippets in disposable, sandboxed containers", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file
    #[arg(long, global = true, env = "FNBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Container engine binary (overrides the config file)
    #[arg(long, global = true, env = "FNBOX_ENGINE")]
    engine: Option<String>,

    /// Metrics log path (overrides the config file)
    #[arg(long, global = true, env = "FNBOX_METRICS_PATH")]
    metrics_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one source file and print its output (never warms the pool)
    Exec {
        /// Source file, or `-` for stdin
        file: PathBuf,

        /// Deadline in seconds (default: from config)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Isolation backend: standard or sandboxed
        #[arg(short, long, default_value = "standard", value_parser = parse_backend)]
        backend: Backend,

        /// Source language: python or node
        #[arg(short, long, default_value = "python", value_parser = parse_language)]
        language: Language,

        /// Print the response as JSON instead of the raw output
        #[arg(long)]
        json_output: bool,
    },

    /// Run JSON requests read one per line
    Batch {
        /// Request file, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Maximum invocations in flight
        #[arg(short, long, default_value = "4")]
        concurrency: usize,

        /// Skip the background warm-up
        #[arg(long)]
        no_warm: bool,
    },

    /// Pull the base image and pre-build the warm pool
    Warm {
        /// Pool tag prefix (default: from config)
        #[arg(long)]
        tag: Option<String>,

        /// Number of pool images (default: from config)
        #[arg(long)]
        count: Option<usize>,
    },

    /// Print metrics records as JSON
    Metrics {
        #[arg(long, value_parser = parse_backend)]
        backend: Option<Backend>,

        /// Only successful (true) or failed (false) invocations
        #[arg(long)]
        success: Option<bool>,

        /// Earliest timestamp (unix seconds, inclusive)
        #[arg(long)]
        from_ts: Option<f64>,

        /// Latest timestamp (unix seconds, inclusive)
        #[arg(long)]
        to_ts: Option<f64>,
    },
}

fn parse_backend(s: &str) -> std::result::Result<Backend, String> {
    s.parse().map_err(|e: fnbox_core::FnboxError| e.to_string())
}

fn parse_language(s: &str) -> std::result::Result<Language, String> {
    s.parse().map_err(|e: fnbox_core::FnboxError| e.to_string())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    fnbox_core::telemetry::init_tracing(cli.json, level);

    let config = resolve_config(
        cli.config.as_deref(),
        cli.engine.clone(),
        cli.metrics_path.clone(),
    )?;
    let runtime = Runtime::start(&config)?;

    let code = match cli.command {
        Commands::Exec {
            file,
            timeout,
            backend,
            language,
            json_output,
        } => {
            let timeout = timeout.unwrap_or(config.default_timeout_secs);
            cmd_exec(&runtime, &file, timeout, backend, language, json_output).await?
        }
        Commands::Batch {
            input,
            concurrency,
            no_warm,
        } => {
            let warm = batch_warm_up(&config, no_warm);
            cmd_batch(&runtime, &config, &input, concurrency, warm).await?
        }
        Commands::Warm { tag, count } => {
            let tag = tag.unwrap_or_else(|| config.pool_tag.clone());
            let count = count.unwrap_or(config.pool_size);
            cmd_warm(&runtime, &tag, count).await?
        }
        Commands::Metrics {
            backend,
            success,
            from_ts,
            to_ts,
        } => {
            let filter = MetricsFilter {
                backend: backend.map(|b| b.as_str().to_string()),
                success,
                from_ts,
                to_ts,
            };
            cmd_metrics(&runtime, filter).await?
        }
    };

    Ok(code)
}

/// Config file (if any), then flag/env overrides.
fn resolve_config(
    path: Option<&Path>,
    engine: Option<String>,
    metrics_path: Option<PathBuf>,
) -> Result<FnboxConfig> {
    let mut config = match path {
        Some(path) => FnboxConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => FnboxConfig::default(),
    };
    if let Some(engine) = engine {
        config.engine_program = engine;
    }
    if let Some(metrics_path) = metrics_path {
        config.metrics_path = metrics_path;
    }
    config.validate()?;
    Ok(config)
}

/// Executor and warm pool sharing one engine and one metrics writer.
struct Runtime {
    executor: FunctionExecutor,
    pool: WarmPool,
}

impl Runtime {
    fn start(config: &FnboxConfig) -> Result<Self> {
        let engine: Arc<dyn ContainerEngine> = Arc::new(config.engine());
        Self::with_engine(config, engine)
    }

    fn with_engine(config: &FnboxConfig, engine: Arc<dyn ContainerEngine>) -> Result<Self> {
        let templates = config.templates().context("Failed to load templates")?;
        let workspaces = WorkspaceManager::new(&config.workspace_root);
        let store = Arc::new(JsonFileMetricsStore::new(&config.metrics_path));
        let (recorder, _writer) = MetricsRecorder::spawn(store);

        let pool = WarmPool::new(
            engine.clone(),
            workspaces.clone(),
            templates.get(Language::Python).clone(),
            Arc::new(MemoryPoolStore::new()),
        );
        let executor = FunctionExecutor::new(engine, workspaces, templates, recorder);
        Ok(Self { executor, pool })
    }
}

async fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("Failed to read stdin")?;
        Ok(buf)
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }
}

/// Run one source file.
async fn cmd_exec(
    runtime: &Runtime,
    file: &Path,
    timeout: u64,
    backend: Backend,
    language: Language,
    json_output: bool,
) -> Result<ExitCode> {
    let code = read_input(file).await?;
    let request = InvocationRequest::new(code)
        .with_timeout(timeout)
        .with_backend(backend)
        .with_language(language);

    let report = runtime.executor.execute(request).await?;
    METRICS.flush();

    if json_output {
        println!("{}", serde_json::to_string(&report.to_response())?);
    } else {
        let output = report.output();
        print!("{output}");
        if !output.ends_with('\n') {
            println!();
        }
    }

    Ok(if report.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Whether `batch` starts the background warm-up. One-shot `exec` exits
/// before a pool build could be used, so only `batch` consults this.
fn batch_warm_up(config: &FnboxConfig, no_warm: bool) -> bool {
    config.warm_on_startup && !no_warm
}

/// Parse one batch line; an omitted `timeout` takes `default_timeout`.
fn parse_request(line: &str, default_timeout: u64) -> Result<InvocationRequest> {
    let mut value: Value = serde_json::from_str(line).context("invalid JSON")?;
    if let Some(obj) = value.as_object_mut() {
        obj.entry("timeout").or_insert_with(|| json!(default_timeout));
    }
    let request: InvocationRequest =
        serde_json::from_value(value).context("invalid request")?;
    Ok(request)
}

/// Run every non-blank line of `input`, at most `concurrency` at a time,
/// returning one JSON value per line in input order.
async fn run_batch(
    executor: &FunctionExecutor,
    input: &str,
    default_timeout: u64,
    concurrency: usize,
) -> Vec<Value> {
    let lines: Vec<&str> = input.lines().filter(|l| !l.trim().is_empty()).collect();
    stream::iter(lines)
        .map(|line| async move {
            let request = match parse_request(line, default_timeout) {
                Ok(request) => request,
                Err(e) => return json!({ "error": format!("{e:#}") }),
            };
            match executor.execute(request).await {
                Ok(report) => json!({ "output": report.output() }),
                Err(e) => json!({ "error": e.to_string() }),
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}

/// Run a batch of JSON requests.
async fn cmd_batch(
    runtime: &Runtime,
    config: &FnboxConfig,
    input: &Path,
    concurrency: usize,
    warm: bool,
) -> Result<ExitCode> {
    let warming: Option<JoinHandle<_>> =
        warm.then(|| runtime.pool.spawn(config.pool_tag.clone(), config.pool_size));

    let input = read_input(input).await?;
    let results = run_batch(
        &runtime.executor,
        &input,
        config.default_timeout_secs,
        concurrency,
    )
    .await;
    for result in &results {
        println!("{}", serde_json::to_string(result)?);
    }
    METRICS.flush();

    if let Some(handle) = warming {
        match handle.await {
            Ok(report) => info!(
                ready = report.ready.len(),
                failed = report.failed.len(),
                "background warm-up finished"
            ),
            Err(e) => warn!(error = %e, "background warm-up task failed"),
        }
    }

    let all_ok = results.iter().all(|r| r.get("output").is_some());
    Ok(if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Warm up and pre-build the pool in the foreground.
async fn cmd_warm(runtime: &Runtime, tag: &str, count: usize) -> Result<ExitCode> {
    let report = runtime.pool.run(tag, count).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if report.failed.is_empty() && report.pull_error.is_none() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Print matching metrics records.
async fn cmd_metrics(runtime: &Runtime, filter: MetricsFilter) -> Result<ExitCode> {
    let records = runtime
        .executor
        .recorder()
        .query(filter)
        .await
        .context("Failed to read metrics")?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(ExitCode::SUCCESS)
}
