//! Concurrent graph execution.
//!
//! The executor walks a [`StepGraph`] Kahn-style: every node waits for all
//! of its parents to succeed (or to already be done), ready nodes run as
//! tokio tasks bounded by a semaphore, and a failure only blocks the
//! failed node's descendants. Run-state lives here, never in the graph.
//!
//! Each step runs in its own task so a panic fails only that node. The
//! coordinator keeps the join handles tagged with their node ids.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::config::ExecutorConfig;
use crate::error::{StepError, StepResult};
use crate::graph::{build_partial_graph, NodeId, StepGraph};
use crate::obs;
use crate::params::DeferredParameters;
use crate::report::{ExecuteError, ExecutionFailure, ExecutionReport, NodeOutcome, NodeStatus};
use crate::step::{input_digest, Step};

/// Runs step graphs.
///
/// Parameters of every node that succeeds (or is already done) are
/// published onto the executor's [`DeferredParameters`] before any of its
/// children start. Steps that consume parameters should be built with a
/// clone of [`Executor::parameters`].
pub struct Executor {
    config: ExecutorConfig,
    params: Arc<DeferredParameters>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            params: Arc::new(DeferredParameters::new()),
        }
    }

    /// Publish parameters onto an existing board instead of a private one.
    pub fn with_parameters(mut self, params: Arc<DeferredParameters>) -> Self {
        self.params = params;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn parameters(&self) -> &Arc<DeferredParameters> {
        &self.params
    }

    /// Execute every node of `graph`.
    ///
    /// Never stops at the first failure: all schedulable work completes and
    /// every failure is reported together. `dry` is passed unchanged to each
    /// step call.
    pub async fn execute(
        &self,
        graph: &StepGraph,
        dry: bool,
        cancel: &CancelSignal,
    ) -> Result<ExecutionReport, ExecutionFailure> {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::execution_span(&run_id, dry);
        let report = self.walk(graph, dry, cancel, run_id).instrument(span).await;
        if report.success() {
            Ok(report)
        } else {
            Err(ExecutionFailure {
                failures: report.failures(),
                report,
            })
        }
    }

    /// Select the named targets and their prerequisites, then execute them.
    ///
    /// Selection errors are returned before any step is called.
    pub async fn execute_targets(
        &self,
        steps: &[Arc<dyn Step>],
        targets: &[String],
        dry: bool,
        cancel: &CancelSignal,
    ) -> Result<ExecutionReport, ExecuteError> {
        let graph = build_partial_graph(steps, targets)?;
        Ok(self.execute(&graph, dry, cancel).await?)
    }

    async fn walk(
        &self,
        graph: &StepGraph,
        dry: bool,
        cancel: &CancelSignal,
        run_id: String,
    ) -> ExecutionReport {
        let clock = Instant::now();
        obs::emit_execution_started(&run_id, graph.len(), graph.roots().len());

        let mut outcomes: Vec<Option<NodeOutcome>> = vec![None; graph.len()];
        let mut waiting_on: Vec<usize> = graph.nodes().iter().map(|n| n.parents().len()).collect();
        let mut ready: VecDeque<NodeId> = graph.roots().iter().copied().collect();
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallelism.max(1)));
        let mut in_flight = FuturesUnordered::new();
        // Set by the first failing task under fail-fast, before it releases
        // its permit, so queued tasks see it as soon as they get one.
        let halt = CancelSignal::new();
        let mut halted = false;
        let mut cancelled = false;

        loop {
            let work_left = !ready.is_empty() || !in_flight.is_empty();
            if !halted && work_left && cancel.is_cancelled() {
                debug!("cancel signal received; no further steps will start");
                halted = true;
                cancelled = true;
            }
            if !halted {
                while let Some(id) = ready.pop_front() {
                    let fail_fast = self.config.fail_fast;
                    in_flight.push(spawn_node(graph, id, dry, cancel, &halt, fail_fast, &semaphore));
                }
            }

            let Some((id, finished)) = in_flight.next().await else {
                break;
            };
            let run = finished.unwrap_or_else(NodeRun::panicked);
            let label = graph.label(id);

            if let Some(error) = &run.error {
                obs::emit_node_failed(&label, error);
            }
            obs::emit_node_finished(&label, run.status, run.duration_ms);

            match run.status {
                NodeStatus::Skipped | NodeStatus::Succeeded => {
                    let node = graph.node(id);
                    let (params, gate) = node.step().provides();
                    if !params.is_empty() {
                        debug!(
                            step = %label,
                            gate = %gate.map(|g| g.to_string()).unwrap_or_default(),
                            count = params.len(),
                            "publishing parameters"
                        );
                        self.params.publish(&params);
                    }
                    for &child in node.children() {
                        waiting_on[child] -= 1;
                        if waiting_on[child] == 0 && outcomes[child].is_none() {
                            ready.push_back(child);
                        }
                    }
                }
                NodeStatus::Failed => {
                    if run.cancelled {
                        halted = true;
                        cancelled = true;
                    }
                    if self.config.fail_fast {
                        halt.cancel();
                        halted = true;
                    }
                    for blocked in graph.descendants(id) {
                        if outcomes[blocked].is_some() {
                            continue;
                        }
                        let blocked_label = graph.label(blocked);
                        obs::emit_node_blocked(&blocked_label, &label);
                        let mut outcome = NodeOutcome::unstarted(
                            blocked,
                            blocked_label,
                            NodeStatus::SkippedDueToFailure,
                        );
                        outcome.blocked_by = Some(label.clone());
                        outcomes[blocked] = Some(outcome);
                    }
                }
                NodeStatus::NotStarted => {
                    halted = true;
                    cancelled |= run.cancelled;
                }
                _ => {}
            }
            outcomes[id] = Some(run.into_outcome(id, label));
        }

        for (id, slot) in outcomes.iter_mut().enumerate() {
            if slot.is_some() {
                continue;
            }
            let mut outcome = NodeOutcome::unstarted(id, graph.label(id), NodeStatus::NotStarted);
            if !halted {
                outcome.error = Some("waiting on a dependency cycle".to_string());
            }
            *slot = Some(outcome);
        }

        let report = ExecutionReport {
            run_id,
            dry_run: dry,
            cancelled,
            nodes: outcomes.into_iter().flatten().collect(),
            duration_ms: clock.elapsed().as_millis() as u64,
        };
        obs::emit_execution_finished(
            &report.run_id,
            report.duration_ms,
            report.succeeded_count(),
            report.skipped_count(),
            report.failed_count(),
            report.success(),
        );
        report
    }
}

/// Spawn one node's task and return its id-tagged join handle.
fn spawn_node(
    graph: &StepGraph,
    id: NodeId,
    dry: bool,
    cancel: &CancelSignal,
    halt: &CancelSignal,
    fail_fast: bool,
    semaphore: &Arc<Semaphore>,
) -> impl Future<Output = (NodeId, Result<NodeRun, JoinError>)> {
    let step = Arc::clone(graph.node(id).step());
    let label = graph.label(id);
    let cancel = cancel.clone();
    let halt = halt.clone();
    let semaphore = Arc::clone(semaphore);
    let span = obs::node_span(&label);

    let work = async move {
        let run = NodeRun::pending();
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return run.not_started(true),
            _ = halt.cancelled() => return run.not_started(false),
            permit = semaphore.acquire_owned() => permit.ok(),
        };
        if cancel.is_cancelled() {
            return run.not_started(true);
        }
        if halt.is_cancelled() {
            return run.not_started(false);
        }
        obs::emit_node_started(&label);
        let run = run_node(run, step.as_ref(), dry, &cancel).await;
        if fail_fast && run.status == NodeStatus::Failed {
            halt.cancel();
        }
        run
    }
    .instrument(span);

    let handle = tokio::spawn(work);
    async move { (id, handle.await) }
}

async fn run_node(run: NodeRun, step: &dyn Step, dry: bool, cancel: &CancelSignal) -> NodeRun {
    let mut run = run.advance(NodeStatus::Checking);

    match guarded(cancel, step.done(dry)).await {
        Ok(true) => return run.finish(NodeStatus::Skipped),
        Ok(false) => {}
        Err(e) => return run.fail(e),
    }

    let inputs = match guarded(cancel, step.inputs(dry)).await {
        Ok(inputs) => inputs,
        Err(e) => return run.fail(e),
    };
    let digest = input_digest(&inputs);
    debug!(input_digest = %digest, inputs = inputs.len(), "resolved step inputs");
    run.input_digest = Some(digest);

    let run = run.advance(NodeStatus::Running);
    match guarded(cancel, step.run(dry)).await {
        Ok(()) => run.finish(NodeStatus::Succeeded),
        Err(e) => run.fail(e),
    }
}

/// Race a step call against the cancel signal.
async fn guarded<T>(
    cancel: &CancelSignal,
    call: impl Future<Output = StepResult<T>>,
) -> StepResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StepError::Cancelled),
        result = call => result,
    }
}

/// Task-local record of one node's execution.
struct NodeRun {
    status: NodeStatus,
    input_digest: Option<String>,
    error: Option<String>,
    cancelled: bool,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    clock: Option<Instant>,
    duration_ms: u64,
}

impl NodeRun {
    /// A node whose task exists but has not been granted a permit.
    fn pending() -> Self {
        Self {
            status: NodeStatus::Pending,
            input_digest: None,
            error: None,
            cancelled: false,
            started_at: None,
            finished_at: None,
            clock: None,
            duration_ms: 0,
        }
    }

    /// Move to `status`, stamping the start time on the first probe.
    fn advance(mut self, status: NodeStatus) -> Self {
        debug_assert!(
            self.status.can_advance_to(status),
            "illegal transition {} -> {status}",
            self.status
        );
        debug!(from = %self.status, to = %status, "node state");
        if self.status == NodeStatus::Pending && status == NodeStatus::Checking {
            self.started_at = Some(Utc::now());
            self.clock = Some(Instant::now());
        }
        self.status = status;
        self
    }

    /// Scheduling stopped before this node got a permit.
    fn not_started(mut self, cancelled: bool) -> Self {
        self.cancelled = cancelled;
        self.advance(NodeStatus::NotStarted)
    }

    fn panicked(error: JoinError) -> Self {
        let mut run = Self::pending();
        run.status = NodeStatus::Failed;
        run.error = Some(format!("step task panicked: {error}"));
        run
    }

    fn finish(mut self, status: NodeStatus) -> Self {
        self = self.advance(status);
        self.finished_at = Some(Utc::now());
        if let Some(clock) = self.clock {
            self.duration_ms = clock.elapsed().as_millis() as u64;
        }
        self
    }

    fn fail(mut self, error: StepError) -> Self {
        self.cancelled = error.is_cancelled();
        self.error = Some(error.to_string());
        self.finish(NodeStatus::Failed)
    }

    fn into_outcome(self, node: NodeId, step: String) -> NodeOutcome {
        NodeOutcome {
            node,
            step,
            status: self.status,
            input_digest: self.input_digest,
            error: self.error,
            blocked_by: None,
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_ms: self.duration_ms,
        }
    }
}
