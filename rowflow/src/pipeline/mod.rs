//! Graph descriptions, the builder and build-time validation.

mod builder;
mod description;
mod validate;

pub use builder::GraphBuilder;
pub use description::{GraphDescription, HopDef, StageDef, TargetDecl};
pub use validate::GraphPlan;
