//! Testing utilities for rowflow graphs.
//!
//! This module provides:
//! - Ready-made stages: generators, collectors, filters and failing stages
//! - Assertions on [`RunResult`](crate::engine::RunResult)

mod assertions;
mod stages;

pub use assertions::{
    assert_failed_at, assert_run_failed, assert_run_succeeded, assert_stage_outcome,
    assert_stage_written,
};
pub use stages::{
    CollectorSink, FailOnRow, LifecycleCounts, LifecycleRecorder, PredicateFilter, RowGenerator,
    RowValidator,
};
