//! Stage traits and the step context.
//!
//! A stage is described once by a shared, immutable [`StageMeta`] and runs as
//! one [`Stage`] instance per copy. Per-copy state lives in the `Stage`
//! value and is never shared between threads.

mod context;
mod input;
mod listener;

#[cfg(test)]
pub(crate) use context::test_support;
pub(crate) use context::{ContextParts, NodeSettings};
pub use context::StepContext;
pub use input::InputHandle;
pub use listener::{CollectingRowListener, RowEventKind, RowListener};

use crate::core::{FieldMeta, Row, RowShape};
use crate::errors::{SchemaError, StepError};
use std::fmt::Debug;
use std::sync::Arc;

/// Shared configuration of a stage.
///
/// Implementations are read by every copy concurrently and must not change
/// after the graph is built.
pub trait StageMeta: Send + Sync + Debug {
    /// Creates the per-copy processing state.
    fn create(&self, copy: usize) -> Box<dyn Stage>;

    /// Names of the targets this stage sends rows to.
    ///
    /// A non-empty list puts the stage in named-target mode. Every name must
    /// be declared in the graph.
    fn targets(&self) -> Vec<String> {
        Vec::new()
    }

    /// Input fields the stage reads. Checked against the input shape before
    /// the first row is processed.
    fn referenced_fields(&self) -> Vec<String> {
        Vec::new()
    }

    /// The output shape for a given input shape. Sources receive `None`.
    fn output_shape(&self, input: Option<&RowShape>) -> Result<RowShape, SchemaError> {
        Ok(input.cloned().unwrap_or_default())
    }

    /// Whether the stage reads its inputs as separate streams through
    /// [`StepContext::take_input`]. Such stages may receive rows of
    /// different shapes.
    fn reads_inputs_separately(&self) -> bool {
        false
    }
}

/// Per-copy processing logic.
pub trait Stage: Send {
    /// Prepares the copy. Returning `Ok(false)` fails initialization.
    fn init(&mut self, _ctx: &mut StepContext) -> Result<bool, StepError> {
        Ok(true)
    }

    /// Processes one unit of work, usually one row.
    ///
    /// Returns `Ok(false)` when the stage has no more work, typically after
    /// `get_row` returned `None`. A stage may also stop early, for example
    /// after a row limit; the node then discards whatever upstream still
    /// sends until every input is done.
    fn transform(&mut self, ctx: &mut StepContext) -> Result<bool, StepError>;

    /// Releases resources. Always called, also after failures.
    fn dispose(&mut self, _ctx: &mut StepContext) {}
}

/// Per-row function signature used by [`FnStage`].
pub type RowFn = dyn Fn(&Row) -> Result<Option<Row>, StepError> + Send + Sync;

/// A stage built from a per-row function.
///
/// The function returns `Ok(None)` to drop a row.
#[derive(Clone)]
pub struct FnStage {
    func: Arc<RowFn>,
    output_fields: Vec<FieldMeta>,
    referenced: Vec<String>,
}

impl FnStage {
    /// Creates a function stage that keeps the input shape.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Row) -> Result<Option<Row>, StepError> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            output_fields: Vec::new(),
            referenced: Vec::new(),
        }
    }

    /// Declares a field the function appends to every row.
    #[must_use]
    pub fn with_output_field(mut self, field: FieldMeta) -> Self {
        self.output_fields.push(field);
        self
    }

    /// Declares an input field the function reads.
    #[must_use]
    pub fn with_referenced_field(mut self, name: impl Into<String>) -> Self {
        self.referenced.push(name.into());
        self
    }
}

impl Debug for FnStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("output_fields", &self.output_fields)
            .field("referenced", &self.referenced)
            .finish_non_exhaustive()
    }
}

impl StageMeta for FnStage {
    fn create(&self, _copy: usize) -> Box<dyn Stage> {
        Box::new(FnStageCopy {
            func: Arc::clone(&self.func),
        })
    }

    fn referenced_fields(&self) -> Vec<String> {
        self.referenced.clone()
    }

    fn output_shape(&self, input: Option<&RowShape>) -> Result<RowShape, SchemaError> {
        let mut shape = input.cloned().unwrap_or_default();
        for field in &self.output_fields {
            shape.add_field(field.clone())?;
        }
        Ok(shape)
    }
}

struct FnStageCopy {
    func: Arc<RowFn>,
}

impl Stage for FnStageCopy {
    fn transform(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        let Some(row) = ctx.get_row()? else {
            return Ok(false);
        };
        if let Some(out) = (self.func)(&row)? {
            ctx.put_row(out)?;
        }
        Ok(true)
    }
}

/// Forwards every input row unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl StageMeta for PassThrough {
    fn create(&self, _copy: usize) -> Box<dyn Stage> {
        Box::new(PassThrough)
    }
}

impl Stage for PassThrough {
    fn transform(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        match ctx.get_row()? {
            Some(row) => {
                ctx.put_row(row)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
