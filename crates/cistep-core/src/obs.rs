//! Structured observability hooks for execution lifecycle events.
//!
//! Events are emitted at `info!` level except node failures (`warn!`).
//! Verbosity follows `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use tracing::{info, warn, Span};

use crate::report::NodeStatus;

/// Span tagging every event of one execution with its run id.
///
/// Attach it to async work with `tracing::Instrument::instrument`.
pub fn execution_span(run_id: &str, dry_run: bool) -> Span {
    tracing::info_span!("cistep.execute", run_id = %run_id, dry_run = dry_run)
}

/// Span wrapping one node's probe and run.
pub fn node_span(step: &str) -> Span {
    tracing::info_span!("cistep.node", step = %step)
}

pub fn emit_execution_started(run_id: &str, nodes: usize, roots: usize) {
    info!(event = "execution.started", run_id = %run_id, nodes = nodes, roots = roots);
}

pub fn emit_node_started(step: &str) {
    info!(event = "node.started", step = %step);
}

/// Emit the terminal state of a node.
pub fn emit_node_finished(step: &str, status: NodeStatus, duration_ms: u64) {
    info!(
        event = "node.finished",
        step = %step,
        status = %status,
        duration_ms = duration_ms,
    );
}

pub fn emit_node_failed(step: &str, error: &dyn std::fmt::Display) {
    warn!(event = "node.failed", step = %step, error = %error);
}

/// Emit that a node will never start because `blocked_by` failed.
pub fn emit_node_blocked(step: &str, blocked_by: &str) {
    info!(event = "node.blocked", step = %step, blocked_by = %blocked_by);
}

pub fn emit_execution_finished(
    run_id: &str,
    duration_ms: u64,
    succeeded: usize,
    skipped: usize,
    failed: usize,
    success: bool,
) {
    info!(
        event = "execution.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        succeeded = succeeded,
        skipped = skipped,
        failed = failed,
        success = success,
    );
}
