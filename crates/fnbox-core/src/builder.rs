//! Image builder: submitted code + execution template → tagged image.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::{BuildSpec, ContainerEngine};
use crate::error::{FnboxError, Result};
use crate::invocation::{ImageTag, InvocationId};
use crate::template::ExecutionTemplate;
use crate::workspace::Workspace;

/// Materializes build contexts and asks the engine to build them.
///
/// No retries: a failed build is terminal for its invocation.
#[derive(Clone)]
pub struct ImageBuilder {
    engine: Arc<dyn ContainerEngine>,
}

impl ImageBuilder {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Build the image for invocation `id`, tagged `temp-func-{id}`.
    pub async fn build(
        &self,
        workspace: &Workspace,
        code: &str,
        template: &ExecutionTemplate,
        id: &InvocationId,
    ) -> Result<ImageTag> {
        let tag = id.image_tag();
        self.build_tagged(workspace, code, template, &tag).await?;
        Ok(tag)
    }

    /// Write `code` and the template into `workspace`, then build it as `tag`.
    ///
    /// Fails with [`FnboxError::Build`] carrying the engine's diagnostic when
    /// the build exits non-zero or cannot be started.
    pub async fn build_tagged(
        &self,
        workspace: &Workspace,
        code: &str,
        template: &ExecutionTemplate,
        tag: &ImageTag,
    ) -> Result<()> {
        let source = workspace.path().join(template.source_file());
        tokio::fs::write(&source, code).await?;
        template.materialize(workspace.path()).await?;

        let spec = BuildSpec {
            context_dir: workspace.path().to_path_buf(),
            tag: tag.clone(),
            dockerfile: None,
        };
        debug!(tag = %tag, context = %workspace.path().display(), "building image");

        let output = self.engine.build(&spec).await.map_err(|e| {
            warn!(tag = %tag, error = %e, "image build could not start");
            FnboxError::Build {
                diagnostic: e.to_string(),
            }
        })?;

        if !output.success() {
            return Err(FnboxError::Build {
                diagnostic: output.diagnostic(),
            });
        }
        Ok(())
    }
}
