//! Row routing.
//!
//! Each node owns a [`Router`] that is either in default mode (every row to
//! every default hop, spread over the consumer copies by a [`Distribution`])
//! or in named-target mode (rows go only where the stage sends them). An
//! optional error hop receives rejected rows.

mod distribution;
mod errors;
mod group;
mod router;

pub use distribution::Distribution;
pub use errors::{
    error_shape, ErrorHandling, RowError, ERROR_CODES_FIELD, ERROR_COUNT_FIELD,
    ERROR_DESCRIPTIONS_FIELD, ERROR_FIELDS_FIELD,
};
pub use group::{partition_of, OutputGroup};
pub use router::{Router, RouterMode, TargetHandle};
