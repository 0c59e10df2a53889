//! # Rowflow
//!
//! A threaded row-pipeline execution engine for ETL graphs.
//!
//! A graph of stages is connected by hops. At run time every stage copy
//! becomes a node on its own OS thread, and every connected pair of copies
//! gets a bounded channel. Rows stream through the graph with backpressure:
//!
//! - **Bounded channels**: producers block when a channel is full, consumers
//!   when it is empty, both re-checking cancellation at the poll interval
//! - **Routing**: default hops with round-robin, copy-to-all or partitioned
//!   distribution; named targets resolved at build time; an error hop for
//!   rejected rows
//! - **Row shapes**: the field layout of each link is fixed by its first row
//! - **Cancellation**: one run-wide flag; any node failure stops the run
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rowflow::prelude::*;
//! use rowflow::testing::{CollectorSink, PredicateFilter, RowGenerator};
//!
//! let desc = GraphBuilder::new("even-odd")
//!     .stage("numbers", RowGenerator::sequence("n", 1..=10))
//!     .stage("is_even", PredicateFilter::new("n", |v| v.as_i64().is_some_and(|n| n % 2 == 0)))
//!     .stage("evens", CollectorSink::new())
//!     .stage("odds", CollectorSink::new())
//!     .hop("numbers", "is_even")
//!     .target_hop("is_even", "true", "evens")
//!     .target_hop("is_even", "false", "odds")
//!     .build()?;
//!
//! let result = Engine::build(desc, EngineConfig::default())?.run()?;
//! assert!(result.success);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod channel;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod node;
pub mod observability;
pub mod pipeline;
pub mod routing;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancelReason, CancellationToken};
    pub use crate::core::{FieldMeta, NodeId, NodeOutcome, NodeState, Row, RowShape, Value, ValueType};
    pub use crate::engine::{run_graph, Engine, EngineConfig, RunResult};
    pub use crate::errors::{
        BuildError, EngineError, ErrorInfo, ErrorKind, InitError, RowflowError, SchemaError,
        StepError, TransformError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{GraphBuilder, GraphDescription, HopDef, StageDef};
    pub use crate::routing::{Distribution, ErrorHandling, RowError, TargetHandle};
    pub use crate::row;
    pub use crate::stages::{
        FnStage, InputHandle, PassThrough, RowListener, Stage, StageMeta, StepContext,
    };
}
