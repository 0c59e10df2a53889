//! Aggregated run results.

use crate::cancellation::CancelReason;
use crate::core::{NodeId, NodeOutcome, NodeState};
use crate::errors::{ErrorKind, InitError, RowflowError, TransformError};
use crate::node::{MetricsSnapshot, NodeFailure, NodeReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final summary of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    /// The node.
    pub node: NodeId,
    /// Why it stopped.
    pub outcome: NodeOutcome,
    /// Final lifecycle state.
    pub state: NodeState,
    /// Final counters.
    pub metrics: MetricsSnapshot,
    /// Whether the node has no output channels.
    pub terminal: bool,
    /// Failure message, if the node errored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&NodeReport> for NodeSummary {
    fn from(report: &NodeReport) -> Self {
        Self {
            node: report.node.clone(),
            outcome: report.outcome,
            state: report.state,
            metrics: report.metrics,
            terminal: report.terminal,
            error: report.failure.as_ref().map(NodeFailure::message),
        }
    }
}

/// The first failure of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// The failing node.
    pub node: NodeId,
    /// Classification.
    pub kind: ErrorKind,
    /// Description.
    pub message: String,
}

/// Outcome of one engine run. Written once, after every node thread joined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Identity of the run.
    pub run_id: Uuid,
    /// Graph name.
    pub pipeline: String,
    /// When initialization started.
    pub started_at: DateTime<Utc>,
    /// When the last thread joined.
    pub ended_at: DateTime<Utc>,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
    /// True iff no node failed and the run was not cancelled.
    pub success: bool,
    /// Whether the run-wide cancellation flag was set.
    pub cancelled: bool,
    /// Why the run was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<CancelReason>,
    /// Whether a graceful stop was requested.
    pub stopped: bool,
    /// Sum of node error counts.
    pub errors: u64,
    /// Rows read by terminal nodes.
    pub rows_read: u64,
    /// Rows written by terminal nodes.
    pub rows_written: u64,
    /// Rows rejected by all nodes.
    pub rows_rejected: u64,
    /// The first failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    /// Per-node summaries, ordered by node id.
    pub nodes: Vec<NodeSummary>,
}

pub(crate) struct RunTiming {
    pub(crate) run_id: Uuid,
    pub(crate) pipeline: String,
    pub(crate) started_at: DateTime<Utc>,
}

impl RunResult {
    pub(crate) fn aggregate(
        timing: RunTiming,
        mut reports: Vec<NodeReport>,
        cancel_reason: Option<CancelReason>,
        stopped: bool,
    ) -> Self {
        reports.sort_by(|a, b| a.node.cmp(&b.node));
        let ended_at = Utc::now();

        let mut errors = 0;
        let mut rows_read = 0;
        let mut rows_written = 0;
        let mut rows_rejected = 0;
        for report in &reports {
            errors += report.metrics.errors;
            rows_rejected += report.metrics.rows_rejected;
            if report.terminal {
                rows_read += report.metrics.rows_read;
                rows_written += report.metrics.rows_written;
            }
        }

        let failure = first_failure(&reports, cancel_reason.as_ref());
        let cancelled = cancel_reason.is_some();
        let any_failed = reports.iter().any(|r| r.outcome.is_failure());

        Self {
            run_id: timing.run_id,
            pipeline: timing.pipeline,
            started_at: timing.started_at,
            ended_at,
            duration_ms: u64::try_from((ended_at - timing.started_at).num_milliseconds().max(0))
                .unwrap_or_default(),
            success: !cancelled && !any_failed && errors == 0,
            cancelled,
            cancel_reason,
            stopped,
            errors,
            rows_read,
            rows_written,
            rows_rejected,
            failure,
            nodes: reports.iter().map(NodeSummary::from).collect(),
        }
    }

    /// Summary of one node.
    #[must_use]
    pub fn node(&self, stage: &str, copy: usize) -> Option<&NodeSummary> {
        self.nodes
            .iter()
            .find(|n| n.node.stage == stage && n.node.copy == copy)
    }

    /// Counters of a stage, summed over its copies.
    #[must_use]
    pub fn stage_metrics(&self, stage: &str) -> MetricsSnapshot {
        let mut total = MetricsSnapshot::default();
        for summary in self.nodes.iter().filter(|n| n.node.stage == stage) {
            total += summary.metrics;
        }
        total
    }

    /// Converts an unsuccessful result into an error.
    pub fn into_result(self) -> Result<Self, RowflowError> {
        if self.success {
            return Ok(self);
        }
        match &self.failure {
            Some(f) if f.kind == ErrorKind::Init => {
                Err(InitError::new(f.node.clone(), f.message.clone()).into())
            }
            Some(f) => Err(TransformError::new(f.node.clone(), f.kind, f.message.clone()).into()),
            None => Err(RowflowError::Cancelled(
                self.cancel_reason
                    .as_ref()
                    .map_or_else(|| "run did not succeed".to_string(), ToString::to_string),
            )),
        }
    }
}

/// The failure of the node that caused the cancellation, else the first in
/// node order.
fn first_failure(reports: &[NodeReport], reason: Option<&CancelReason>) -> Option<FailureInfo> {
    let culprit = match reason {
        Some(CancelReason::NodeFailed { node } | CancelReason::InitFailed { node }) => Some(node),
        _ => None,
    };
    let with_failure = |r: &&NodeReport| r.failure.is_some();
    let report = culprit
        .and_then(|node| reports.iter().filter(with_failure).find(|r| &r.node == node))
        .or_else(|| reports.iter().find(with_failure))?;
    let failure = report.failure.as_ref()?;
    Some(FailureInfo {
        node: report.node.clone(),
        kind: failure.kind(),
        message: failure.message(),
    })
}
