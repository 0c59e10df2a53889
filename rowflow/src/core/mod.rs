//! Core data model types for rowflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Typed values and immutable rows
//! - Row shapes (field descriptors)
//! - Node identity, lifecycle states and outcomes

mod ids;
mod row;
mod shape;
mod status;
mod value;

pub use ids::NodeId;
pub use row::Row;
pub use shape::{FieldMeta, RowShape, RowShapeBuilder, ValueType};
pub use status::{NodeOutcome, NodeState};
pub use value::Value;
