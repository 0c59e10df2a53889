//! Fluent graph builder.

use super::{GraphDescription, HopDef, StageDef, TargetDecl};
use crate::errors::BuildError;
use crate::routing::{Distribution, ErrorHandling};
use crate::stages::StageMeta;
use std::sync::Arc;

/// Builder for graph descriptions.
///
/// Mistakes are collected and reported by [`GraphBuilder::build`], which
/// validates the whole graph.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    desc: GraphDescription,
}

impl GraphBuilder {
    /// Creates a builder for a named graph.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            desc: GraphDescription {
                name: name.into(),
                ..GraphDescription::default()
            },
        }
    }

    /// Adds a single-copy stage.
    #[must_use]
    pub fn stage(self, name: impl Into<String>, meta: impl StageMeta + 'static) -> Self {
        self.stage_def(StageDef::new(name, Arc::new(meta)))
    }

    /// Adds a stage running `copies` parallel copies.
    #[must_use]
    pub fn stage_copies(
        self,
        name: impl Into<String>,
        meta: impl StageMeta + 'static,
        copies: usize,
    ) -> Self {
        self.stage_def(StageDef::new(name, Arc::new(meta)).with_copies(copies))
    }

    /// Adds a fully specified stage.
    #[must_use]
    pub fn stage_def(mut self, def: StageDef) -> Self {
        self.desc.stages.push(def);
        self
    }

    /// Sets the rejection limits of an already added stage.
    #[must_use]
    pub fn error_handling(mut self, stage: &str, error_handling: ErrorHandling) -> Self {
        if let Some(def) = self.desc.stages.iter_mut().find(|s| s.name == stage) {
            def.error_handling = error_handling;
        }
        self
    }

    /// Adds a default round-robin hop.
    #[must_use]
    pub fn hop(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.hop_with(HopDef::new(from, to))
    }

    /// Adds a default hop with an explicit distribution.
    #[must_use]
    pub fn distributed_hop(
        self,
        from: impl Into<String>,
        to: impl Into<String>,
        distribution: Distribution,
    ) -> Self {
        self.hop_with(HopDef::new(from, to).with_distribution(distribution))
    }

    /// Adds a fully specified hop.
    #[must_use]
    pub fn hop_with(mut self, hop: HopDef) -> Self {
        self.desc.hops.push(hop);
        self
    }

    /// Declares a target of `from` and binds it to `to`.
    #[must_use]
    pub fn target_hop(
        self,
        from: impl Into<String>,
        target: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        let from = from.into();
        let target = target.into();
        self.declare_target(from.clone(), target.clone())
            .hop_with(HopDef::new(from, to).with_target(target))
    }

    /// Declares a target of `stage` without binding it. Rows sent there are
    /// dropped.
    #[must_use]
    pub fn declare_target(mut self, stage: impl Into<String>, target: impl Into<String>) -> Self {
        let decl = TargetDecl {
            stage: stage.into(),
            name: target.into(),
        };
        if !self.desc.targets.contains(&decl) {
            self.desc.targets.push(decl);
        }
        self
    }

    /// Adds the error hop of `from`.
    #[must_use]
    pub fn error_hop(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.hop_with(HopDef::new(from, to).as_error())
    }

    /// Returns the number of stages added so far.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.desc.stages.len()
    }

    /// Validates and returns the description.
    pub fn build(self) -> Result<GraphDescription, BuildError> {
        self.desc.validate()?;
        Ok(self.desc)
    }
}
