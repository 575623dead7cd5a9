//! Execution outcomes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::graph::NodeId;

/// Lifecycle state of a node during execution.
///
/// `Pending`, `Checking` and `Running` are transient; every node ends an
/// execution in one of the remaining states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Checking,
    Running,
    /// `done` reported the effect already exists; `run` was not called.
    Skipped,
    Succeeded,
    Failed,
    /// An ancestor failed, so this node was never started.
    SkippedDueToFailure,
    /// Scheduling stopped (cancellation, fail-fast, or an unsatisfiable
    /// dependency cycle) before this node was started.
    NotStarted,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            NodeStatus::Pending | NodeStatus::Checking | NodeStatus::Running
        )
    }

    /// Whether a node in this state may move to `next`.
    ///
    /// `Pending -> Checking -> {Skipped | Running -> {Succeeded | Failed}}`.
    /// A probe may fail from `Checking`, and a pending node may be left
    /// `NotStarted`. Nothing leaves a terminal state.
    pub fn can_advance_to(&self, next: NodeStatus) -> bool {
        matches!(
            (self, next),
            (NodeStatus::Pending, NodeStatus::Checking)
                | (NodeStatus::Pending, NodeStatus::NotStarted)
                | (NodeStatus::Checking, NodeStatus::Skipped)
                | (NodeStatus::Checking, NodeStatus::Running)
                | (NodeStatus::Checking, NodeStatus::Failed)
                | (NodeStatus::Running, NodeStatus::Succeeded)
                | (NodeStatus::Running, NodeStatus::Failed)
        )
    }

    /// Whether dependents of a node in this state may start.
    pub fn unblocks_children(&self) -> bool {
        matches!(self, NodeStatus::Skipped | NodeStatus::Succeeded)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Checking => "checking",
            NodeStatus::Running => "running",
            NodeStatus::Skipped => "skipped",
            NodeStatus::Succeeded => "succeeded",
            NodeStatus::Failed => "failed",
            NodeStatus::SkippedDueToFailure => "skipped_due_to_failure",
            NodeStatus::NotStarted => "not_started",
        };
        f.write_str(s)
    }
}

/// What happened to one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub node: NodeId,
    /// Step label (name, or a description of what it creates).
    pub step: String,
    pub status: NodeStatus,
    /// SHA-256 of the step's resolved inputs, when they were resolved.
    pub input_digest: Option<String>,
    pub error: Option<String>,
    /// Label of the failed ancestor for `SkippedDueToFailure` nodes.
    pub blocked_by: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl NodeOutcome {
    pub(crate) fn unstarted(node: NodeId, step: String, status: NodeStatus) -> Self {
        Self {
            node,
            step,
            status,
            input_digest: None,
            error: None,
            blocked_by: None,
            started_at: None,
            finished_at: None,
            duration_ms: 0,
        }
    }
}

/// A failed node and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub step: String,
    pub error: String,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.error)
    }
}

/// Result of walking a whole graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub run_id: String,
    pub dry_run: bool,
    /// The caller's cancel signal fired during the execution.
    pub cancelled: bool,
    /// One outcome per node, indexed by [`NodeId`].
    pub nodes: Vec<NodeOutcome>,
    pub duration_ms: u64,
}

impl ExecutionReport {
    fn count(&self, status: NodeStatus) -> usize {
        self.nodes.iter().filter(|n| n.status == status).count()
    }

    pub fn succeeded_count(&self) -> usize {
        self.count(NodeStatus::Succeeded)
    }

    /// Nodes skipped because they were already done.
    pub fn skipped_count(&self) -> usize {
        self.count(NodeStatus::Skipped)
    }

    pub fn failed_count(&self) -> usize {
        self.count(NodeStatus::Failed)
    }

    pub fn blocked_count(&self) -> usize {
        self.count(NodeStatus::SkippedDueToFailure)
    }

    pub fn not_started_count(&self) -> usize {
        self.count(NodeStatus::NotStarted)
    }

    /// `true` when every node succeeded or was already done.
    pub fn success(&self) -> bool {
        !self.cancelled && self.nodes.iter().all(|n| n.status.unblocks_children())
    }

    /// Outcome of the first node whose label is `step`.
    pub fn outcome(&self, step: &str) -> Option<&NodeOutcome> {
        self.nodes.iter().find(|n| n.step == step)
    }

    /// Every node that failed, plus nodes stranded by a dependency cycle.
    pub fn failures(&self) -> Vec<NodeFailure> {
        self.nodes
            .iter()
            .filter(|n| n.error.is_some())
            .filter(|n| matches!(n.status, NodeStatus::Failed | NodeStatus::NotStarted))
            .map(|n| NodeFailure {
                step: n.step.clone(),
                error: n.error.clone().unwrap_or_default(),
            })
            .collect()
    }
}

/// An execution that did not fully succeed.
///
/// Carries every failure encountered plus the full report so callers can
/// show the whole blast radius.
#[derive(Debug)]
pub struct ExecutionFailure {
    pub failures: Vec<NodeFailure>,
    pub report: ExecutionReport,
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.report.cancelled {
            f.write_str("execution cancelled")?;
        } else {
            f.write_str("execution failed")?;
        }
        if !self.failures.is_empty() {
            let joined: Vec<String> = self.failures.iter().map(ToString::to_string).collect();
            write!(
                f,
                ": {} step(s) failed: {}",
                self.failures.len(),
                joined.join("; ")
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecutionFailure {}

/// Errors from targeted execution: selection fails before anything runs,
/// or execution fails afterwards.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Execution(#[from] ExecutionFailure),
}

impl ExecuteError {
    /// The execution report, when selection succeeded and steps ran.
    pub fn report(&self) -> Option<&ExecutionReport> {
        match self {
            ExecuteError::Graph(_) => None,
            ExecuteError::Execution(failure) => Some(&failure.report),
        }
    }
}
