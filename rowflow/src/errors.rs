//! Error types for the rowflow engine.
//!
//! The taxonomy follows the lifecycle of a run: graph construction
//! ([`BuildError`]), node initialization ([`InitError`]), shape negotiation
//! ([`SchemaError`]), per-row processing ([`TransformError`]) and cooperative
//! shutdown (the `Cancelled` variants). Stage code works with [`StepError`].

use crate::channel::ChannelId;
use crate::core::{NodeId, RowShape, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// The main error type for rowflow operations.
#[derive(Debug, Error)]
pub enum RowflowError {
    /// The graph description or engine configuration is invalid.
    #[error("{0}")]
    Build(#[from] BuildError),

    /// A node failed to initialize.
    #[error("{0}")]
    Init(#[from] InitError),

    /// A row did not match its negotiated shape.
    #[error("{0}")]
    Schema(#[from] SchemaError),

    /// A stage failed while processing rows.
    #[error("{0}")]
    Transform(#[from] TransformError),

    /// A channel invariant was violated.
    #[error("{0}")]
    Channel(#[from] ChannelError),

    /// The supervisor could not run the graph.
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// The run was cancelled.
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// Configuration could not be read.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Broad classification of a failure, recorded in run results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Graph construction failure.
    Build,
    /// Node initialization failure.
    Init,
    /// Shape negotiation failure.
    Schema,
    /// Per-row processing failure.
    Transform,
    /// Channel invariant violation.
    Channel,
    /// Cooperative cancellation.
    Cancelled,
}

/// Machine-readable detail attached to a [`BuildError`].
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Stable code, e.g. `GRAPH-UNKNOWN-STAGE`.
    pub code: String,
    /// One-line summary.
    pub summary: String,
    /// What to change to make the graph valid.
    pub hint: Option<String>,
    /// Named values involved, such as the offending setting.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl ErrorInfo {
    /// Info with `code` and `summary` and nothing else.
    #[must_use]
    pub fn new(code: &str, summary: impl Into<String>) -> Self {
        Self {
            code: code.to_owned(),
            summary: summary.into(),
            ..Self::default()
        }
    }
}

/// Error raised when a graph cannot be built. No thread is started.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BuildError {
    /// Human-readable description.
    pub message: String,
    /// Stage names the problem involves, possibly empty.
    pub stages: Vec<String>,
    /// Code and hint, for callers that match on the failure.
    pub info: Option<ErrorInfo>,
}

impl BuildError {
    /// A coded error whose summary is the message itself.
    #[must_use]
    pub fn coded(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            info: Some(ErrorInfo::new(code, message.clone())),
            message,
            stages: Vec::new(),
        }
    }

    /// Records the stages involved.
    #[must_use]
    pub fn involving<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stages.extend(stages.into_iter().map(Into::into));
        self
    }

    /// Adds a fix hint. No-op on an uncoded error.
    #[must_use]
    pub fn hint(mut self, hint: &str) -> Self {
        if let Some(info) = self.info.as_mut() {
            info.hint = Some(hint.to_owned());
        }
        self
    }

    /// Adds a named detail. No-op on an uncoded error.
    #[must_use]
    pub fn detail(mut self, key: &str, value: &str) -> Self {
        if let Some(info) = self.info.as_mut() {
            info.details.insert(key.to_owned(), value.to_owned());
        }
        self
    }

    /// The stable code, if the error carries one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.info.as_ref().map(|i| i.code.as_str())
    }

    /// A hop or target references a stage that does not exist.
    #[must_use]
    pub fn unknown_stage(referrer: &str, missing: &str) -> Self {
        Self::coded(
            "GRAPH-UNKNOWN-STAGE",
            format!("Stage '{referrer}' references unknown stage '{missing}'"),
        )
        .involving([referrer, missing])
        .hint("Add the stage to the graph before wiring hops to it.")
    }

    /// A stage's logic uses a target name the graph never declared.
    #[must_use]
    pub fn undeclared_target(stage: &str, target: &str) -> Self {
        Self::coded(
            "GRAPH-UNDECLARED-TARGET",
            format!("Stage '{stage}' sends rows to target '{target}' which is not declared in the graph"),
        )
        .involving([stage])
        .detail("target", target)
        .hint("Declare the target, bound to a stage or left unbound for an optional branch.")
    }

    /// The graph contains a cycle.
    #[must_use]
    pub fn cycle(path: Vec<String>) -> Self {
        Self::coded(
            "GRAPH-CYCLE",
            format!("Graph contains a cycle: {}", path.join(" -> ")),
        )
        .involving(path)
        .hint("Remove one of the hops in the cycle.")
    }
}

/// Error raised when a node's `init` hook fails.
#[derive(Debug, Clone, Error)]
#[error("Node {node} failed to initialize: {message}")]
pub struct InitError {
    /// The node that failed.
    pub node: NodeId,
    /// Failure description.
    pub message: String,
}

impl InitError {
    /// Creates a new init error.
    #[must_use]
    pub fn new(node: NodeId, message: impl Into<String>) -> Self {
        Self {
            node,
            message: message.into(),
        }
    }
}

/// Error raised when rows or shapes disagree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct SchemaError {
    /// Failure description.
    pub message: String,
    /// The field involved, if any.
    pub field: Option<String>,
}

impl SchemaError {
    /// Creates a schema error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
        }
    }

    /// A referenced field is absent from the shape.
    #[must_use]
    pub fn missing_field(name: &str, shape: &RowShape) -> Self {
        Self {
            message: format!("Field '{name}' not found in input shape {shape}"),
            field: Some(name.to_string()),
        }
    }

    /// A field name appears twice.
    #[must_use]
    pub fn duplicate_field(name: &str) -> Self {
        Self {
            message: format!("Field '{name}' is defined more than once"),
            field: Some(name.to_string()),
        }
    }

    /// Row arity differs from the shape.
    #[must_use]
    pub fn arity(expected: usize, actual: usize) -> Self {
        Self::new(format!(
            "Row has {actual} values but its shape declares {expected} fields"
        ))
    }

    /// A value does not match its field type.
    #[must_use]
    pub fn type_mismatch(field: &str, expected: ValueType, actual: Option<ValueType>) -> Self {
        let actual = actual.map_or_else(|| "null".to_string(), |t| t.to_string());
        Self {
            message: format!("Field '{field}' expects {expected} but got {actual}"),
            field: Some(field.to_string()),
        }
    }

    /// Two shapes meet on the same link and disagree.
    #[must_use]
    pub fn incompatible(frozen: &RowShape, offered: &RowShape) -> Self {
        Self::new(format!(
            "Row shape {offered} does not match the shape {frozen} frozen on this link"
        ))
    }
}

/// Error recorded against a node whose per-row logic failed.
#[derive(Debug, Clone, Error)]
#[error("Node {node} failed: {message}")]
pub struct TransformError {
    /// The node that failed.
    pub node: NodeId,
    /// The classified cause.
    pub kind: ErrorKind,
    /// Failure description.
    pub message: String,
}

impl TransformError {
    /// Creates a transform error.
    #[must_use]
    pub fn new(node: NodeId, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            node,
            kind,
            message: message.into(),
        }
    }
}

/// Outcomes of channel operations other than success.
///
/// Full and empty conditions are never errors; they block.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChannelError {
    /// The run-wide cancellation flag was observed.
    #[error("Channel operation cancelled")]
    Cancelled,

    /// The consumer endpoint was torn down.
    #[error("Consumer of channel {0} is gone")]
    ConsumerGone(ChannelId),

    /// The producer pushed after closing its endpoint.
    #[error("Producer of channel {0} already closed it")]
    ProducerClosed(ChannelId),

    /// The row shape disagrees with the one frozen on the channel.
    #[error("{0}")]
    Schema(#[from] SchemaError),
}

/// Errors surfaced to stage code through the step context.
#[derive(Debug, Error)]
pub enum StepError {
    /// The run was cancelled; the node should stop quietly.
    #[error("Cancelled")]
    Cancelled,

    /// Shape negotiation failed.
    #[error("{0}")]
    Schema(#[from] SchemaError),

    /// A channel invariant was violated.
    #[error("{0}")]
    Channel(ChannelError),

    /// Misuse of the routing API.
    #[error("Routing error: {0}")]
    Routing(String),

    /// The error hop rejected more rows than allowed.
    #[error("Too many rejected rows: {rejected} (limit {limit})")]
    TooManyRejected {
        /// Rows rejected so far.
        rejected: u64,
        /// The configured limit that was crossed.
        limit: String,
    },

    /// The stage panicked.
    #[error("Stage panicked: {0}")]
    Panicked(String),

    /// Any other stage failure.
    #[error("{0:#}")]
    Failed(#[from] anyhow::Error),
}

impl From<ChannelError> for StepError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Cancelled => Self::Cancelled,
            ChannelError::Schema(schema) => Self::Schema(schema),
            other => Self::Channel(other),
        }
    }
}

impl StepError {
    /// Creates a generic failure from a message.
    #[must_use]
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(anyhow::anyhow!("{message}"))
    }

    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Schema(_) => ErrorKind::Schema,
            Self::Channel(_) => ErrorKind::Channel,
            Self::Routing(_)
            | Self::TooManyRejected { .. }
            | Self::Panicked(_)
            | Self::Failed(_) => ErrorKind::Transform,
        }
    }

    /// Returns true for the cooperative-cancellation outcome.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors raised by the supervisor itself.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `run` was called more than once.
    #[error("Engine '{0}' has already been started")]
    AlreadyStarted(String),

    /// A node thread could not be spawned.
    #[error("Failed to spawn thread for node {node}: {source}")]
    Spawn {
        /// The node whose thread failed to start.
        node: NodeId,
        /// The OS error.
        #[source]
        source: std::io::Error,
    },

    /// The async wrapper lost its blocking task.
    #[error("Supervisor task failed: {0}")]
    Join(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coded_error_carries_hint_and_details() {
        let err = BuildError::coded("TEST-001", "broken graph")
            .involving(["extract"])
            .detail("setting", "poll_interval")
            .hint("Fix this by doing that");

        let info = err.info.as_ref().unwrap();
        assert_eq!(err.to_string(), "broken graph");
        assert_eq!(err.stages, vec!["extract".to_string()]);
        assert_eq!(info.summary, "broken graph");
        assert_eq!(info.hint.as_deref(), Some("Fix this by doing that"));
        assert_eq!(info.details["setting"], "poll_interval");
    }

    #[test]
    fn test_build_error_codes() {
        assert_eq!(
            BuildError::unknown_stage("a", "b").code(),
            Some("GRAPH-UNKNOWN-STAGE")
        );
        let err = BuildError::cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert!(err.to_string().contains("a -> b -> a"));
        assert_eq!(err.code(), Some("GRAPH-CYCLE"));
    }

    #[test]
    fn test_channel_error_maps_to_step_error() {
        assert!(StepError::from(ChannelError::Cancelled).is_cancelled());
        let schema = StepError::from(ChannelError::Schema(SchemaError::arity(2, 1)));
        assert_eq!(schema.kind(), ErrorKind::Schema);
    }

    #[test]
    fn test_anyhow_converts_to_failed() {
        fn stage_logic() -> Result<(), StepError> {
            Err(anyhow::anyhow!("lookup table missing"))?;
            Ok(())
        }
        let err = stage_logic().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transform);
        assert!(err.to_string().contains("lookup table missing"));
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = SchemaError::type_mismatch("id", ValueType::Integer, None);
        assert_eq!(err.field.as_deref(), Some("id"));
        assert!(err.message.contains("null"));
    }
}
