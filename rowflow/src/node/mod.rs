//! Nodes: running copies of stages.
//!
//! A node owns its stage state and step context and walks the lifecycle
//! `Created -> Initialized -> Running -> Finishing -> Done`, diverting to
//! `Errored` on failure.

mod metrics;
mod runner;

pub use metrics::{MetricsSnapshot, NodeMetrics};
pub(crate) use runner::{panic_message, Node};
pub use runner::{NodeFailure, NodeReport};
