//! Lifecycle events.
//!
//! The engine reports run and node lifecycle transitions to an
//! [`EventSink`] as JSON payloads. Event types are dotted names such as
//! `node.finished`.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};

/// Emitted once before node initialization.
pub const RUN_STARTED: &str = "run.started";
/// Emitted per node after a successful `init`.
pub const NODE_INITIALIZED: &str = "node.initialized";
/// Emitted per node when its thread ends without failure.
pub const NODE_FINISHED: &str = "node.finished";
/// Emitted per node on init or processing failure.
pub const NODE_FAILED: &str = "node.failed";
/// Emitted once after every node thread joined.
pub const RUN_COMPLETED: &str = "run.completed";
