//! Graph description types.

use crate::routing::{Distribution, ErrorHandling};
use crate::stages::StageMeta;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A stage of the graph: shared configuration plus a copy count.
#[derive(Debug, Clone)]
pub struct StageDef {
    /// Unique stage name.
    pub name: String,
    /// Shared, immutable configuration and factory.
    pub meta: Arc<dyn StageMeta>,
    /// Number of parallel copies.
    pub copies: usize,
    /// Rejection limits applied to the error hop.
    pub error_handling: ErrorHandling,
}

impl StageDef {
    /// Creates a single-copy stage.
    #[must_use]
    pub fn new(name: impl Into<String>, meta: Arc<dyn StageMeta>) -> Self {
        Self {
            name: name.into(),
            meta,
            copies: 1,
            error_handling: ErrorHandling::default(),
        }
    }

    /// Sets the copy count.
    #[must_use]
    pub fn with_copies(mut self, copies: usize) -> Self {
        self.copies = copies;
        self
    }

    /// Sets the rejection limits.
    #[must_use]
    pub fn with_error_handling(mut self, error_handling: ErrorHandling) -> Self {
        self.error_handling = error_handling;
        self
    }
}

/// A directed connection between two stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopDef {
    /// Producing stage.
    pub from: String,
    /// Consuming stage.
    pub to: String,
    /// Named target this hop is bound to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Spread over the consumer's copies.
    #[serde(default)]
    pub distribution: Distribution,
    /// Whether this hop carries rejected rows.
    #[serde(default)]
    pub error: bool,
    /// Disabled hops are ignored.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Channel capacity override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
}

fn default_enabled() -> bool {
    true
}

impl HopDef {
    /// A default, round-robin hop.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            target: None,
            distribution: Distribution::default(),
            error: false,
            enabled: true,
            capacity: None,
        }
    }

    /// Binds the hop to a named target.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Sets the distribution.
    #[must_use]
    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    /// Marks the hop as the error hop.
    #[must_use]
    pub fn as_error(mut self) -> Self {
        self.error = true;
        self
    }

    /// Overrides the channel capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Disables the hop.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Returns true for a default data hop.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.target.is_none() && !self.error
    }
}

/// A target name declared by the graph for a stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetDecl {
    /// The stage that owns the target.
    pub stage: String,
    /// Target name.
    pub name: String,
}

/// A complete, unvalidated graph.
#[derive(Debug, Clone, Default)]
pub struct GraphDescription {
    /// Name used in logs and results.
    pub name: String,
    /// Stages in declaration order.
    pub stages: Vec<StageDef>,
    /// Hops in declaration order.
    pub hops: Vec<HopDef>,
    /// Declared named targets.
    pub targets: Vec<TargetDecl>,
}

impl GraphDescription {
    /// Looks up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageDef> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Enabled hops only.
    pub fn enabled_hops(&self) -> impl Iterator<Item = &HopDef> {
        self.hops.iter().filter(|h| h.enabled)
    }

    /// Total number of nodes (stage copies).
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.stages.iter().map(|s| s.copies).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_serde_defaults() {
        let hop: HopDef = serde_json::from_str(r#"{"from": "a", "to": "b"}"#).unwrap();
        assert_eq!(hop, HopDef::new("a", "b"));
        assert!(hop.enabled);
        assert!(hop.is_default());
    }

    #[test]
    fn test_hop_builders() {
        let hop = HopDef::new("filter", "evens")
            .with_target("true")
            .with_capacity(4)
            .with_distribution(Distribution::CopyToAll);
        assert!(!hop.is_default());
        assert_eq!(hop.capacity, Some(4));

        let json = serde_json::to_value(&hop).unwrap();
        assert_eq!(json["target"], "true");
        assert_eq!(json["distribution"]["mode"], "copy_to_all");
    }
}
