//! Execution templates: the build descriptor paired with each source language.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{FnboxError, Result};
use crate::invocation::Language;

/// File name the build descriptor is written under inside a build context.
pub const DESCRIPTOR_FILE: &str = "Dockerfile";

/// Where a template's build descriptor comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DescriptorSource {
    Builtin(&'static str),
    File(PathBuf),
}

/// A base runtime plus an entrypoint that executes the submitted source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTemplate {
    language: Language,
    source: DescriptorSource,
    base_image: String,
}

const PYTHON_DESCRIPTOR: &str = "\
FROM python:3.9-slim
WORKDIR /app
COPY function.py .
CMD [\"python\", \"function.py\"]
";

const NODE_DESCRIPTOR: &str = "\
FROM node:18-slim
WORKDIR /app
COPY function.js .
CMD [\"node\", \"function.js\"]
";

/// Image named by the first `FROM` instruction of a descriptor.
fn parse_base_image(descriptor: &str) -> Option<String> {
    descriptor
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .find_map(|line| {
            let mut parts = line.split_whitespace();
            let keyword = parts.next()?;
            if !keyword.eq_ignore_ascii_case("FROM") {
                return None;
            }
            parts
                .find(|p| !p.starts_with("--"))
                .map(str::to_string)
        })
}

impl ExecutionTemplate {
    /// The descriptor shipped with fnbox for `language`.
    pub fn builtin(language: Language) -> Self {
        let descriptor = match language {
            Language::Python => PYTHON_DESCRIPTOR,
            Language::Node => NODE_DESCRIPTOR,
        };
        Self {
            language,
            source: DescriptorSource::Builtin(descriptor),
            base_image: parse_base_image(descriptor).unwrap_or_default(),
        }
    }

    /// A descriptor read from disk; copied unmodified into each build context.
    pub fn from_file(language: Language, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            FnboxError::Config(format!("cannot read template {}: {e}", path.display()))
        })?;
        let base_image = parse_base_image(&content).ok_or_else(|| {
            FnboxError::Config(format!("template {} has no FROM instruction", path.display()))
        })?;
        Ok(Self {
            language,
            source: DescriptorSource::File(path),
            base_image,
        })
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Base runtime image the descriptor builds from.
    pub fn base_image(&self) -> &str {
        &self.base_image
    }

    /// Fixed name the submitted code is written under.
    pub fn source_file(&self) -> &'static str {
        match self.language {
            Language::Python => "function.py",
            Language::Node => "function.js",
        }
    }

    /// Place the descriptor into `context_dir` as [`DESCRIPTOR_FILE`].
    pub async fn materialize(&self, context_dir: &Path) -> Result<PathBuf> {
        let target = context_dir.join(DESCRIPTOR_FILE);
        match &self.source {
            DescriptorSource::Builtin(content) => tokio::fs::write(&target, content).await?,
            DescriptorSource::File(path) => {
                tokio::fs::copy(path, &target).await?;
            }
        }
        debug!(language = %self.language, target = %target.display(), "template materialized");
        Ok(target)
    }
}

/// One template per supported language.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    python: ExecutionTemplate,
    node: ExecutionTemplate,
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateSet {
    pub fn builtin() -> Self {
        Self {
            python: ExecutionTemplate::builtin(Language::Python),
            node: ExecutionTemplate::builtin(Language::Node),
        }
    }

    /// Built-ins overridden by `<dir>/<language>/Dockerfile` where present.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut set = Self::builtin();
        for lang in Language::ALL {
            let candidate = dir.join(lang.as_str()).join(DESCRIPTOR_FILE);
            if candidate.is_file() {
                *set.slot_mut(lang) = ExecutionTemplate::from_file(lang, candidate)?;
            }
        }
        Ok(set)
    }

    pub fn get(&self, language: Language) -> &ExecutionTemplate {
        match language {
            Language::Python => &self.python,
            Language::Node => &self.node,
        }
    }

    fn slot_mut(&mut self, language: Language) -> &mut ExecutionTemplate {
        match language {
            Language::Python => &mut self.python,
            Language::Node => &mut self.node,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_python_template() {
        let t = ExecutionTemplate::builtin(Language::Python);
        assert_eq!(t.base_image(), "python:3.9-slim");
        assert_eq!(t.source_file(), "function.py");
    }

    #[test]
    fn test_builtin_node_template() {
        let t = ExecutionTemplate::builtin(Language::Node);
        assert_eq!(t.base_image(), "node:18-slim");
        assert_eq!(t.source_file(), "function.js");
    }

    #[test]
    fn test_parse_base_image_skips_comments_and_flags() {
        let d = "# syntax=docker/dockerfile:1\n\nFROM --platform=linux/amd64 python:3.12-alpine AS run\nCMD x";
        assert_eq!(parse_base_image(d).as_deref(), Some("python:3.12-alpine"));
        assert_eq!(parse_base_image("RUN echo hi"), None);
    }

    #[tokio::test]
    async fn test_materialize_builtin_writes_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = ExecutionTemplate::builtin(Language::Python)
            .materialize(dir.path())
            .await
            .unwrap();
        let written = std::fs::read_to_string(path).unwrap();
        assert_eq!(written, PYTHON_DESCRIPTOR);
    }

    #[tokio::test]
    async fn test_template_dir_override_is_copied_verbatim() {
        let templates = tempfile::tempdir().unwrap();
        let py = templates.path().join("python");
        std::fs::create_dir_all(&py).unwrap();
        let custom = "FROM python:3.11-slim\nCOPY function.py .\nCMD [\"python\", \"-u\", \"function.py\"]\n";
        std::fs::write(py.join("Dockerfile"), custom).unwrap();

        let set = TemplateSet::from_dir(templates.path()).unwrap();
        let python = set.get(Language::Python);
        assert_eq!(python.base_image(), "python:3.11-slim");
        // No override for node: the built-in stays.
        assert_eq!(set.get(Language::Node).base_image(), "node:18-slim");

        let ctx = tempfile::tempdir().unwrap();
        let target = python.materialize(ctx.path()).await.unwrap();
        assert_eq!(std::fs::read_to_string(target).unwrap(), custom);
    }

    #[test]
    fn test_template_without_from_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Dockerfile");
        std::fs::write(&path, "CMD [\"true\"]\n").unwrap();
        let err = ExecutionTemplate::from_file(Language::Python, &path).unwrap_err();
        assert!(matches!(err, FnboxError::Config(_)));
    }
}
