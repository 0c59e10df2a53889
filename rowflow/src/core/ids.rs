//! Node identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one running copy of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// Stage name.
    pub stage: String,
    /// Copy index, starting at 0.
    pub copy: usize,
}

impl NodeId {
    /// Creates a node id.
    #[must_use]
    pub fn new(stage: impl Into<String>, copy: usize) -> Self {
        Self {
            stage: stage.into(),
            copy,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stage, self.copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display_and_order() {
        let a = NodeId::new("load", 0);
        let b = NodeId::new("load", 1);
        assert_eq!(a.to_string(), "load.0");
        assert!(a < b);
    }
}
