//! Cleanup coordinator: releases everything an invocation created.
//!
//! Cleanup never fails. Each step is attempted regardless of the previous
//! one; problems are logged, counted and collected into a [`CleanupReport`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::{ContainerEngine, ImageRemoval};
use crate::invocation::{ContainerName, ImageTag, InvocationId};
use crate::metrics::METRICS;
use crate::obs;
use crate::workspace::{Workspace, WorkspaceManager};

/// Resources an invocation still holds once build and run are over.
#[derive(Debug, Default)]
pub struct CleanupTicket {
    /// Set only when the container may still be running.
    pub container: Option<ContainerName>,
    /// Image tag to remove. Set even when the build failed, since the engine
    /// may have tagged a partial image.
    pub image: Option<ImageTag>,
    pub workspace: Option<Workspace>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStep {
    Container,
    Image,
    Workspace,
}

impl CleanupStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupStep::Container => "container",
            CleanupStep::Image => "image",
            CleanupStep::Workspace => "workspace",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupIssue {
    pub step: CleanupStep,
    pub message: String,
}

/// What cleanup did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// `Some(true)` removed, `Some(false)` already gone, `None` not attempted
    /// or failed.
    pub container_removed: Option<bool>,
    pub image: Option<ImageRemoval>,
    pub workspace_released: bool,
    pub issues: Vec<CleanupIssue>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Clone)]
pub struct CleanupCoordinator {
    engine: Arc<dyn ContainerEngine>,
    workspaces: WorkspaceManager,
}

impl CleanupCoordinator {
    pub fn new(engine: Arc<dyn ContainerEngine>, workspaces: WorkspaceManager) -> Self {
        Self { engine, workspaces }
    }

    /// Container, then image, then workspace.
    pub async fn cleanup(&self, id: &InvocationId, ticket: CleanupTicket) -> CleanupReport {
        let mut report = CleanupReport::default();

        if let Some(container) = &ticket.container {
            match self.engine.stop_container(container).await {
                Ok(removed) => report.container_removed = Some(removed),
                Err(e) => Self::note(&mut report, id, CleanupStep::Container, &e),
            }
        }

        if let Some(tag) = &ticket.image {
            match self.engine.remove_image(tag).await {
                Ok(removal) => {
                    if removal == ImageRemoval::InUse {
                        tracing::debug!(tag = %tag, "image still in use, left for the engine");
                    }
                    report.image = Some(removal);
                }
                Err(e) => Self::note(&mut report, id, CleanupStep::Image, &e),
            }
        }

        if let Some(workspace) = ticket.workspace {
            match self.workspaces.release(workspace).await {
                Ok(()) => report.workspace_released = true,
                Err(e) => Self::note(&mut report, id, CleanupStep::Workspace, &e),
            }
        }

        report
    }

    fn note(
        report: &mut CleanupReport,
        id: &InvocationId,
        step: CleanupStep,
        error: &dyn std::fmt::Display,
    ) {
        obs::emit_cleanup_error(id, step.as_str(), error);
        METRICS.inc_cleanup_errors();
        report.issues.push(CleanupIssue {
            step,
            message: error.to_string(),
        });
    }
}
