use serde::{Deserialize, Serialize};
use std::fmt;

/// How rows of one hop are spread over the consuming stage's copies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Distribution {
    /// Each row goes to exactly one copy, rotating.
    #[default]
    RoundRobin,
    /// Each row goes to every copy.
    CopyToAll,
    /// Rows with equal values of `field` always reach the same copy.
    Partitioned {
        /// The partitioning field of the producer's output shape.
        field: String,
    },
}

impl Distribution {
    /// Partitioning by a field.
    #[must_use]
    pub fn partitioned(field: impl Into<String>) -> Self {
        Self::Partitioned {
            field: field.into(),
        }
    }

    /// Returns true for the partitioned mode.
    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        matches!(self, Self::Partitioned { .. })
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "round_robin"),
            Self::CopyToAll => write!(f, "copy_to_all"),
            Self::Partitioned { field } => write!(f, "partitioned({field})"),
        }
    }
}
