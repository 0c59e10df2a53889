//! Wide run events: one payload carrying the whole outcome of a run.

use crate::engine::RunResult;
use std::collections::BTreeMap;

/// Builds the `run.completed` payload for `result`.
///
/// Top-level totals are followed by outcome counts and one entry per node.
#[must_use]
pub fn run_summary(result: &RunResult) -> serde_json::Value {
    let mut outcome_counts: BTreeMap<String, u32> = BTreeMap::new();
    for node in &result.nodes {
        *outcome_counts.entry(node.outcome.to_string()).or_insert(0) += 1;
    }

    let nodes: Vec<serde_json::Value> = result
        .nodes
        .iter()
        .map(|n| {
            let mut detail = serde_json::json!({
                "node": n.node.to_string(),
                "outcome": n.outcome,
                "rows_read": n.metrics.rows_read,
                "rows_written": n.metrics.rows_written,
                "rows_rejected": n.metrics.rows_rejected,
                "errors": n.metrics.errors,
            });
            if let Some(err) = &n.error {
                detail["error"] = serde_json::json!(err);
            }
            detail
        })
        .collect();

    let mut payload = serde_json::json!({
        "pipeline": result.pipeline,
        "run_id": result.run_id.to_string(),
        "success": result.success,
        "cancelled": result.cancelled,
        "stopped": result.stopped,
        "errors": result.errors,
        "rows_read": result.rows_read,
        "rows_written": result.rows_written,
        "rows_rejected": result.rows_rejected,
        "started_at": result.started_at.to_rfc3339(),
        "ended_at": result.ended_at.to_rfc3339(),
        "duration_ms": result.duration_ms,
        "outcome_counts": outcome_counts,
        "nodes": nodes,
    });

    if let Some(reason) = &result.cancel_reason {
        payload["cancel_reason"] = serde_json::json!(reason.to_string());
    }
    if let Some(failure) = &result.failure {
        payload["failure"] = serde_json::json!({
            "node": failure.node.to_string(),
            "kind": failure.kind,
            "message": failure.message,
        });
    }
    payload
}
