//! Runtime configuration, loadable from TOML. Every key is optional.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::docker::{DockerCli, DEFAULT_PROGRAM, DEFAULT_SANDBOXED_RUNTIME};
use crate::error::{FnboxError, Result};
use crate::invocation::DEFAULT_TIMEOUT_SECS;
use crate::template::TemplateSet;
use crate::warm_pool::{DEFAULT_POOL_SIZE, DEFAULT_POOL_TAG};

fn default_engine_program() -> String {
    DEFAULT_PROGRAM.to_string()
}

fn default_sandboxed_runtime() -> String {
    DEFAULT_SANDBOXED_RUNTIME.to_string()
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir()
}

fn default_metrics_path() -> PathBuf {
    PathBuf::from("metrics.json")
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_pool_tag() -> String {
    DEFAULT_POOL_TAG.to_string()
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FnboxConfig {
    /// Container engine CLI binary.
    #[serde(default = "default_engine_program")]
    pub engine_program: String,
    /// Runtime selected for the sandboxed backend.
    #[serde(default = "default_sandboxed_runtime")]
    pub sandboxed_runtime: String,
    /// Parent directory of per-invocation workspaces.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Directory of `<language>/Dockerfile` overrides.
    #[serde(default)]
    pub template_dir: Option<PathBuf>,
    #[serde(default = "default_metrics_path")]
    pub metrics_path: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_pool_tag")]
    pub pool_tag: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Start the background warm-up before `fnbox batch`.
    #[serde(default = "default_true")]
    pub warm_on_startup: bool,
}

impl Default for FnboxConfig {
    fn default() -> Self {
        Self {
            engine_program: default_engine_program(),
            sandboxed_runtime: default_sandboxed_runtime(),
            workspace_root: default_workspace_root(),
            template_dir: None,
            metrics_path: default_metrics_path(),
            default_timeout_secs: default_timeout_secs(),
            pool_tag: default_pool_tag(),
            pool_size: default_pool_size(),
            warm_on_startup: true,
        }
    }
}

impl FnboxConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| FnboxError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FnboxError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine_program.trim().is_empty() {
            return Err(FnboxError::Config("engine_program must not be empty".into()));
        }
        if self.default_timeout_secs == 0 {
            return Err(FnboxError::Config(
                "default_timeout_secs must be positive".into(),
            ));
        }
        if self.pool_tag.trim().is_empty() {
            return Err(FnboxError::Config("pool_tag must not be empty".into()));
        }
        Ok(())
    }

    /// The Docker CLI engine this configuration describes.
    pub fn engine(&self) -> DockerCli {
        DockerCli::new(&self.engine_program).with_sandboxed_runtime(&self.sandboxed_runtime)
    }

    /// Built-in templates, overridden from `template_dir` when set.
    pub fn templates(&self) -> Result<TemplateSet> {
        match &self.template_dir {
            Some(dir) => TemplateSet::from_dir(dir),
            None => Ok(TemplateSet::builtin()),
        }
    }
}
