//! Assertions on run results.

use crate::core::NodeOutcome;
use crate::engine::RunResult;
use crate::errors::ErrorKind;

/// Asserts that the run succeeded.
pub fn assert_run_succeeded(result: &RunResult) {
    assert!(
        result.success,
        "Expected a successful run, got errors={} cancelled={} failure={:?}",
        result.errors, result.cancelled, result.failure
    );
}

/// Asserts that the run did not succeed.
pub fn assert_run_failed(result: &RunResult) {
    assert!(
        !result.success,
        "Expected the run to fail, but it succeeded with {} rows written",
        result.rows_written
    );
}

/// Asserts that the first failure was raised by `stage` with `kind`.
pub fn assert_failed_at(result: &RunResult, stage: &str, kind: ErrorKind) {
    let failure = result
        .failure
        .as_ref()
        .unwrap_or_else(|| panic!("Expected a failure at '{stage}', got none"));
    assert_eq!(
        failure.node.stage, stage,
        "Expected failure at '{stage}', got {}: {}",
        failure.node, failure.message
    );
    assert_eq!(failure.kind, kind, "Unexpected failure kind: {}", failure.message);
}

/// Asserts the summed rows written by every copy of `stage`.
pub fn assert_stage_written(result: &RunResult, stage: &str, expected: u64) {
    let actual = result.stage_metrics(stage).rows_written;
    assert_eq!(
        actual, expected,
        "Expected '{stage}' to write {expected} rows, got {actual}"
    );
}

/// Asserts that every copy of `stage` ended with `outcome`.
pub fn assert_stage_outcome(result: &RunResult, stage: &str, outcome: NodeOutcome) {
    let copies: Vec<_> = result.nodes.iter().filter(|n| n.node.stage == stage).collect();
    assert!(!copies.is_empty(), "No node of stage '{stage}' in the result");
    for summary in copies {
        assert_eq!(
            summary.outcome, outcome,
            "Expected {} to end {outcome}, got {}",
            summary.node, summary.outcome
        );
    }
}
