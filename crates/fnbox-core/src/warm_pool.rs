//! Warm pool: pull the base runtime and pre-build a few images at startup.
//!
//! Everything here is best effort. Failures are logged and reported, never
//! propagated, so serving invocations never waits on or fails because of
//! the pool.

use std::sync::Arc;

use fnbox_state::PoolStore;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

use crate::builder::ImageBuilder;
use crate::engine::ContainerEngine;
use crate::error::Result;
use crate::invocation::{ImageTag, InvocationId};
use crate::obs;
use crate::template::ExecutionTemplate;
use crate::workspace::WorkspaceManager;

/// Code baked into every pool image.
pub const WARM_UP_PAYLOAD: &str = "print('This is a base container warm-up')";

pub const DEFAULT_POOL_TAG: &str = "base-python";

pub const DEFAULT_POOL_SIZE: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolFailure {
    pub tag: ImageTag,
    pub error: String,
}

/// Outcome of one warm-up pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolReport {
    /// Base image that was pulled, if the pull succeeded.
    pub pulled: Option<String>,
    /// Error from the pull, if it failed.
    pub pull_error: Option<String>,
    /// Pool tags built and registered, in slot order.
    pub ready: Vec<ImageTag>,
    pub failed: Vec<PoolFailure>,
}

#[derive(Clone)]
pub struct WarmPool {
    engine: Arc<dyn ContainerEngine>,
    builder: ImageBuilder,
    workspaces: WorkspaceManager,
    template: ExecutionTemplate,
    store: Arc<dyn PoolStore>,
}

impl WarmPool {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        workspaces: WorkspaceManager,
        template: ExecutionTemplate,
        store: Arc<dyn PoolStore>,
    ) -> Self {
        Self {
            builder: ImageBuilder::new(engine.clone()),
            engine,
            workspaces,
            template,
            store,
        }
    }

    /// Pull the template's base image once.
    pub async fn warm_up(&self) -> Result<()> {
        let image = self.template.base_image();
        info!(image = %image, "pulling base image");
        self.engine.pull(image).await?;
        Ok(())
    }

    /// Build `count` images tagged `{tag}-0` .. `{tag}-(count-1)` from the
    /// warm-up payload, each in its own scratch workspace.
    pub async fn precreate_pool(&self, tag: &str, count: usize) -> PoolReport {
        let mut report = PoolReport::default();
        for index in 0..count {
            let slot = ImageTag::pool_slot(tag, index);
            match self.build_slot(&slot).await {
                Ok(()) => {
                    obs::emit_pool_image_ready(&slot);
                    report.ready.push(slot);
                }
                Err(e) => {
                    obs::emit_pool_image_failed(&slot, &e);
                    report.failed.push(PoolFailure {
                        tag: slot,
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    /// `warm_up` followed by `precreate_pool`. A failed pull is reported and
    /// the pool is still attempted.
    pub async fn run(&self, tag: &str, count: usize) -> PoolReport {
        let pull = self.warm_up().await;
        let mut report = self.precreate_pool(tag, count).await;
        match pull {
            Ok(()) => report.pulled = Some(self.template.base_image().to_string()),
            Err(e) => {
                warn!(error = %e, "base image pull failed");
                report.pull_error = Some(e.to_string());
            }
        }
        info!(
            ready = report.ready.len(),
            failed = report.failed.len(),
            "warm pool pass finished"
        );
        report
    }

    /// Run [`WarmPool::run`] in the background.
    pub fn spawn(&self, tag: impl Into<String>, count: usize) -> JoinHandle<PoolReport> {
        let pool = self.clone();
        let tag = tag.into();
        let span = tracing::info_span!("fnbox.warm_pool", tag = %tag, count = count);
        tokio::spawn(async move { pool.run(&tag, count).await }.instrument(span))
    }

    async fn build_slot(&self, slot: &ImageTag) -> Result<()> {
        let scratch = format!("fnbox-pool-{}", InvocationId::new());
        let workspace = self.workspaces.acquire(&scratch).await?;
        let built = self
            .builder
            .build_tagged(&workspace, WARM_UP_PAYLOAD, &self.template, slot)
            .await;
        if let Err(e) = self.workspaces.release(workspace).await {
            warn!(workspace = %scratch, error = %e, "failed to release pool workspace");
        }
        built?;
        self.store.register(slot.as_str()).await?;
        Ok(())
    }
}
