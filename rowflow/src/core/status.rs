//! Node lifecycle states and outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of a node.
///
/// ```text
/// Created -> Initialized -> Running -> Finishing -> Done
///    |            |            |           |
///    +-> Errored  +-> Done     +-> Errored +-> Errored -> Done
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Node exists but `init` has not run.
    #[default]
    Created,
    /// `init` succeeded.
    Initialized,
    /// The node thread is looping over `transform`.
    Running,
    /// Input exhausted; outputs are being closed.
    Finishing,
    /// An unrecoverable failure occurred.
    Errored,
    /// `dispose` has run. Terminal.
    Done,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Initialized => write!(f, "initialized"),
            Self::Running => write!(f, "running"),
            Self::Finishing => write!(f, "finishing"),
            Self::Errored => write!(f, "errored"),
            Self::Done => write!(f, "done"),
        }
    }
}

impl NodeState {
    /// Returns true if the state machine permits moving to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Initialized | Self::Errored)
                | (Self::Initialized, Self::Running | Self::Done)
                | (Self::Running, Self::Finishing | Self::Errored | Self::Done)
                | (Self::Finishing, Self::Errored | Self::Done)
                | (Self::Errored, Self::Done)
        )
    }

    /// Returns true for the terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns true while the node thread is processing rows.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Finishing)
    }
}

/// Why a node stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeOutcome {
    /// Input exhausted or stage-requested stop.
    Completed,
    /// The run was cancelled while this node was running.
    Cancelled,
    /// The node failed.
    Failed,
    /// The node was initialized but never ran because the run was aborted.
    Aborted,
}

impl fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

impl NodeOutcome {
    /// Returns true if the outcome counts as a failure.
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed)
    }
}
