//! Structured observability hooks for the invocation lifecycle.
//!
//! This module provides:
//! - an invocation-scoped span, attached to the invocation future with
//!   `Instrument` so it follows the task across `.await` points
//! - emission functions for each lifecycle event
//!
//! Events are emitted at `info!` level (filter with `FNBOX_LOG`), except
//! failures of best-effort work, which are `warn!`.

use tracing::{info, warn};

use crate::invocation::{Backend, FailureKind, ImageTag, InvocationId, Language};

/// Span covering one invocation from acquisition to its metrics record.
pub fn invocation_span(id: &InvocationId, backend: Backend) -> tracing::Span {
    tracing::info_span!("fnbox.invocation", invocation_id = %id, backend = %backend)
}

pub fn emit_invocation_started(
    id: &InvocationId,
    backend: Backend,
    language: Language,
    timeout_secs: u64,
) {
    info!(
        event = "invocation.started",
        invocation_id = %id,
        backend = %backend,
        language = %language,
        timeout_secs = timeout_secs,
    );
}

pub fn emit_image_built(id: &InvocationId, tag: &ImageTag, build_ms: u64) {
    info!(event = "image.built", invocation_id = %id, tag = %tag, build_ms = build_ms);
}

pub fn emit_build_failed(id: &InvocationId, diagnostic: &str) {
    warn!(event = "build.failed", invocation_id = %id, diagnostic = %diagnostic);
}

/// Emit event: run exceeded its deadline; `container_stopped` is whether the
/// follow-up stop was confirmed.
pub fn emit_run_timed_out(id: &InvocationId, limit_secs: u64, container_stopped: bool) {
    warn!(
        event = "run.timed_out",
        invocation_id = %id,
        limit_secs = limit_secs,
        container_stopped = container_stopped,
    );
}

pub fn emit_cleanup_error(id: &InvocationId, step: &str, error: &dyn std::fmt::Display) {
    warn!(event = "cleanup.error", invocation_id = %id, step = %step, error = %error);
}

/// Emit event: invocation finished, cleaned and recorded.
pub fn emit_invocation_finished(
    id: &InvocationId,
    duration_ms: u64,
    success: bool,
    failure: Option<FailureKind>,
) {
    info!(
        event = "invocation.finished",
        invocation_id = %id,
        duration_ms = duration_ms,
        success = success,
        failure = ?failure,
    );
}

pub fn emit_pool_image_ready(tag: &ImageTag) {
    info!(event = "pool.image_ready", tag = %tag);
}

pub fn emit_pool_image_failed(tag: &ImageTag, error: &dyn std::fmt::Display) {
    warn!(event = "pool.image_failed", tag = %tag, error = %error);
}
